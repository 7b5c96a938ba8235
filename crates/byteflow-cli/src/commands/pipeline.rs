//! `byteflow pipeline` — inspect and validate pipeline definitions.

use byteflow_core::providers::ProviderRegistry;
use byteflow_core::roles::RoleRegistry;

/// Validate a pipeline file against the known providers.
pub fn validate(file: &str) -> Result<(), String> {
    let providers = ProviderRegistry::from_env();
    let registry =
        RoleRegistry::from_file(file, &providers.names()).map_err(|e| e.to_string())?;

    println!(
        "Pipeline '{}' is valid: {} roles, final role '{}'",
        registry.pipeline_name(),
        registry.len(),
        registry.final_role().key
    );
    Ok(())
}

/// Print the roles of a pipeline in execution order.
pub fn roles(pipeline_path: Option<&str>) -> Result<(), String> {
    let providers = ProviderRegistry::from_env();
    let registry = match pipeline_path {
        Some(path) => RoleRegistry::from_file(path, &providers.names()),
        None => RoleRegistry::builtin(&providers.names()),
    }
    .map_err(|e| e.to_string())?;

    println!("Pipeline: {}", registry.pipeline_name());
    for role in registry.roles() {
        let mut flags = Vec::new();
        if role.augment_with_search {
            flags.push("search");
        }
        if role.include_prior_outputs {
            flags.push("context");
        }
        if role.is_final {
            flags.push("final");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "  {}. {} ({}) via {}{}",
            role.ordinal, role.name, role.key, role.provider, flags
        );
    }
    Ok(())
}
