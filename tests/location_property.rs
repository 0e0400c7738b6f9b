//! Property tests for module location resolution

use std::path::PathBuf;
use std::sync::Arc;

use proptest::prelude::*;
use url::Url;
use webapp_bridge::deploy::{ClassSpace, LocationResolver};
use webapp_bridge::module::{Manifest, Module, ModuleId};

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,11}"
}

proptest! {
    #[test]
    fn test_manifest_entry_resolves_to_module_root(
        segments in prop::collection::vec(segment(), 1..5),
    ) {
        // Invariant: /X/META-INF/MANIFEST.MF resolves to /X
        let mut root = PathBuf::from("/");
        for segment in &segments {
            root.push(segment);
        }
        let entry = Url::from_file_path(root.join("META-INF").join("MANIFEST.MF")).unwrap();
        let module = Module::new(
            ModuleId(1),
            "prop",
            Manifest::default(),
            Some(entry),
            Arc::new(ClassSpace::empty("prop")),
        );

        let resolver = LocationResolver::new(vec!["jar".to_string()]);
        prop_assert_eq!(resolver.resolve(&module).unwrap(), root);
    }
}
