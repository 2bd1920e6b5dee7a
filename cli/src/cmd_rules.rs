use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde_json::Value;

use chainwatch_config::{ConfigSource, ConfigStore, ConfigStoreOptions, FileConfigSource, WatchMode};
use chainwatch_core::{HexPolicy, RuleValidator, ValidationError};

#[derive(Subcommand)]
pub enum RulesAction {
    /// Print every rule as JSON
    List,
    /// Add a rule, e.g. '{"id":"usdc","name":"USDC","enabled":true,"match":{"address":"0x..."}}'
    Add { json: String },
    /// Replace the rule whose id matches the given rule's id
    Update { json: String },
    /// Delete a rule by id
    Delete { id: String },
}

async fn open(config_path: &Path, policy: HexPolicy) -> Result<Arc<ConfigStore>> {
    let source = Arc::new(FileConfigSource::new(config_path, WatchMode::Native));
    ConfigStore::load(source, RuleValidator::new(policy), ConfigStoreOptions::default())
        .await
        .with_context(|| format!("loading {}", config_path.display()))
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("argument is not valid JSON")
}

fn report(err: &ValidationError) {
    for violation in &err.violations {
        eprintln!("  {violation}");
    }
}

pub async fn run(config_path: &Path, policy: HexPolicy, action: RulesAction) -> Result<()> {
    let store = open(config_path, policy).await?;
    match action {
        RulesAction::List => {
            let config = store.get();
            println!("{}", serde_json::to_string_pretty(&config.rules)?);
        }
        RulesAction::Add { json } => {
            let rule = match store.validator().validate_rule(&parse_json(&json)?) {
                Ok(rule) => rule,
                Err(e) => {
                    report(&e);
                    return Err(e.into());
                }
            };
            let added = store.add_rule(rule).await?;
            println!("added rule {}", added.id);
        }
        RulesAction::Update { json } => {
            let rule = match store.validator().validate_rule(&parse_json(&json)?) {
                Ok(rule) => rule,
                Err(e) => {
                    report(&e);
                    return Err(e.into());
                }
            };
            let updated = store.update_rule(rule).await?;
            println!("updated rule {}", updated.id);
        }
        RulesAction::Delete { id } => {
            let removed = store.delete_rule(&id).await?;
            println!("deleted rule {} ({})", removed.id, removed.name);
        }
    }
    Ok(())
}

/// Bare integers are taken as numbers; anything else is passed on as a JSON
/// string so the validator reports it.
fn delay_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn set_delay(config_path: &Path, policy: HexPolicy, raw: &str) -> Result<()> {
    let store = open(config_path, policy).await?;
    let config = store.update_delay_blocks_value(&delay_value(raw)).await?;
    println!("delayBlocks = {}", config.delay_blocks);
    Ok(())
}

/// Check the document without creating or rewriting it.
pub async fn validate(config_path: &Path, policy: HexPolicy) -> Result<()> {
    let source = FileConfigSource::new(config_path, WatchMode::Native);
    let Some(raw) = source.read().await? else {
        bail!("{} does not exist", config_path.display());
    };
    let doc = parse_json(&raw)?;
    match RuleValidator::new(policy).validate_configuration(&doc) {
        Ok(config) => {
            let enabled = config.enabled_rules().count();
            println!(
                "{}: ok (delayBlocks {}, {} rules, {} enabled)",
                config_path.display(),
                config.delay_blocks,
                config.rules.len(),
                enabled
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {} violation(s)", config_path.display(), e.violations.len());
            report(&e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: &str = r#"{"id":"usdc","name":"USDC transfers","enabled":true,
        "match":{"address":"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"}}"#;

    #[test]
    fn delay_value_keeps_invalid_input_for_the_validator() {
        assert_eq!(delay_value("12"), Value::from(12));
        assert_eq!(delay_value("-3"), Value::from(-3));
        assert_eq!(delay_value("soon"), Value::String("soon".into()));
    }

    #[tokio::test]
    async fn add_list_delete_round() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");

        run(&path, HexPolicy::Strict, RulesAction::Add { json: RULE.into() })
            .await
            .unwrap();
        let dup = run(&path, HexPolicy::Strict, RulesAction::Add { json: RULE.into() }).await;
        assert!(dup.is_err());

        set_delay(&path, HexPolicy::Strict, "3").await.unwrap();
        assert!(set_delay(&path, HexPolicy::Strict, "-1").await.is_err());
        validate(&path, HexPolicy::Strict).await.unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["delayBlocks"], 3);
        assert_eq!(doc["rules"][0]["id"], "usdc");

        run(&path, HexPolicy::Strict, RulesAction::Delete { id: "usdc".into() })
            .await
            .unwrap();
        let missing = run(&path, HexPolicy::Strict, RulesAction::Delete { id: "usdc".into() }).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn validate_does_not_create_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(validate(&path, HexPolicy::Strict).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn validate_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");
        std::fs::write(
            &path,
            r#"{"delayBlocks":1,"rules":[
                {"id":"a","name":"same","enabled":true,"match":{}},
                {"id":"b","name":"same","enabled":true,"match":{}}]}"#,
        )
        .unwrap();
        assert!(validate(&path, HexPolicy::Strict).await.is_err());
    }
}
