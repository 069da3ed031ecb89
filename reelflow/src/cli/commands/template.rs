//! `template` commands: list, show, validate.

use reelflow_core::{OrchestrateError, TemplateDoc};

use crate::cli::args::{TemplateShowArgs, TemplateSubcommand, TemplateValidateArgs};
use crate::cli::commands::build_registry;
use crate::config::OrchestratorConfig;
use crate::error::Result;

/// Executes a template subcommand.
///
/// # Errors
///
/// `show` fails on unknown names; `validate` fails when any file has
/// error-severity issues.
pub fn execute(subcommand: TemplateSubcommand) -> Result<()> {
    match subcommand {
        TemplateSubcommand::List => list(),
        TemplateSubcommand::Show(args) => show(&args),
        TemplateSubcommand::Validate(args) => validate(&args),
    }
}

fn list() -> Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let registry = build_registry(&config)?;
    for doc in registry.templates() {
        let version = doc.version.as_deref().unwrap_or("-");
        let description = doc.description.as_deref().unwrap_or("");
        println!("{:<20} {:<8} {description}", doc.name, version);
    }
    Ok(())
}

fn show(args: &TemplateShowArgs) -> Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let registry = build_registry(&config)?;
    let doc = registry.get(&args.name)?;
    print!("{}", serde_yaml::to_string(doc.as_ref())?);
    Ok(())
}

fn validate(args: &TemplateValidateArgs) -> Result<()> {
    let mut failures = 0usize;
    for path in &args.files {
        let source = std::fs::read_to_string(path)?;
        match TemplateDoc::from_yaml(&source) {
            Ok(doc) => {
                let issues = doc.check_structure();
                if TemplateDoc::has_errors(&issues) {
                    failures += 1;
                    println!("{}: invalid", path.display());
                    for issue in &issues {
                        println!("  {issue}");
                    }
                } else {
                    println!("{}: ok", path.display());
                    for issue in &issues {
                        println!("  {issue}");
                    }
                }
            }
            Err(err) => {
                failures += 1;
                println!("{}: parse error: {err}", path.display());
            }
        }
    }

    if failures > 0 {
        return Err(OrchestrateError::InvalidTemplate {
            name: format!("{failures} file(s)"),
            issues: vec![reelflow_core::ValidationIssue::error(
                "validate",
                "validation failed",
            )],
        }
        .into());
    }
    Ok(())
}
