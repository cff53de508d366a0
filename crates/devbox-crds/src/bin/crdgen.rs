//! Prints the Devbox CRDs as YAML, both versions merged with v1alpha2 as the
//! storage version.
//!
//! Usage: `cargo run -p devbox-crds --bin crdgen > manifests.yaml`

use devbox_crds::SchemaRegistry;

fn main() -> anyhow::Result<()> {
    let registry = SchemaRegistry::devbox();
    for schema in registry.kinds() {
        let crd = schema.generated_definition()?;
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
