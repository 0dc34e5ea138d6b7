// # ippreserve - restore preserved private IPs on migrated VMs
//
// This binary is a THIN integration layer:
// - All orchestration logic lives in ippreserve-core
// - All platform API logic lives in ippreserve-prism
// - Configuration is via environment variables ONLY
//
// The binary is responsible for:
// 1. Reading and validating configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Showing what will be reconfigured and asking for confirmation
// 4. Running the orchestrator and printing a per-record report
//
// ## Configuration
//
// ### Platform
// - `IPPRESERVE_PLATFORM_URL`: API base URL, e.g. `https://10.0.0.10:9440/api/nutanix/v3`
// - `IPPRESERVE_PLATFORM_USERNAME`: Basic auth user
// - `IPPRESERVE_PLATFORM_PASSWORD`: Basic auth password
// - `IPPRESERVE_ACCEPT_INVALID_CERTS`: Skip TLS validation (default: false)
//
// ### Records (exactly one source)
// - `IPPRESERVE_RECORDS_FILE`: JSON file with the preserved-IP records
//   (plain array, `{"records": [...]}`, or a table scan export)
// - `IPPRESERVE_RECORDS_TABLE`: DynamoDB table scanned for the records
// - `IPPRESERVE_RECORDS_REGION`: AWS region of the table (default: SDK
//   region resolution)
//
// ### Orchestrator
// - `IPPRESERVE_SUBNET_NAME`: Subnet every new NIC is attached to
// - `IPPRESERVE_VM_MATCH`: `require-unique` (default) or `first-match`
// - `IPPRESERVE_MAX_RETRIES`: Retries for transient platform failures
// - `IPPRESERVE_RETRY_DELAY_SECS`: Initial retry delay, doubled per retry
// - `IPPRESERVE_CONVERGENCE_TIMEOUT_SECS`: Wait for NIC removal to be observed
// - `IPPRESERVE_MODE`: `live` (default) or `dry-run`
// - `IPPRESERVE_ASSUME_YES`: Skip the confirmation prompt
//
// ### Logging
// - `IPPRESERVE_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ## Example
//
// ```bash
// export IPPRESERVE_PLATFORM_URL=https://10.0.0.10:9440/api/nutanix/v3
// export IPPRESERVE_PLATFORM_USERNAME=admin
// export IPPRESERVE_PLATFORM_PASSWORD=...
// export IPPRESERVE_ACCEPT_INVALID_CERTS=true
// export IPPRESERVE_SUBNET_NAME=VPC-A_Subnet1
// export IPPRESERVE_RECORDS_TABLE=ec2-to-nc2-ip-preservation
// export IPPRESERVE_RECORDS_REGION=ap-northeast-1
// export IPPRESERVE_MODE=dry-run
//
// ippreserve
// ```

use anyhow::{Context, Result};
use ippreserve_core::{
    IpPreserveConfig, Orchestrator, OrchestratorConfig, OrchestratorEvent, PlatformConfig,
    RecordStoreConfig, RunReport, VmMatchStrategy,
};
use ippreserve_prism::PrismClient;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpPreserveExitCode {
    /// Every record succeeded or was skipped without touching its VM
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Run aborted before any VM was touched (store, subnet, platform)
    RuntimeError = 2,
    /// Run finished but at least one VM may have no working NIC
    Degraded = 3,
    /// Operator declined the confirmation prompt
    Aborted = 4,
}

impl From<IpPreserveExitCode> for ExitCode {
    fn from(code: IpPreserveExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    platform_url: String,
    platform_username: String,
    platform_password: String,
    accept_invalid_certs: bool,
    subnet_name: String,
    records: RecordStoreConfig,
    vm_match: VmMatchStrategy,
    max_retries: Option<usize>,
    retry_delay_secs: Option<u64>,
    convergence_timeout_secs: Option<u64>,
    mode: String,
    assume_yes: bool,
    log_level: String,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("platform_url", &self.platform_url)
            .field("platform_username", &self.platform_username)
            .field("platform_password", &"<REDACTED>")
            .field("subnet_name", &self.subnet_name)
            .field("records", &self.records)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Read a required variable
fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("{} is required. Set it via: export {}=...", name, name),
    }
}

/// Parse an optional variable, rejecting values that do not parse
fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", name, value, e))
        })
        .transpose()
}

/// Parse a boolean flag (`true`/`false`, `1`/`0`, `yes`/`no`)
fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool> {
    let Some(value) = lookup(name) else {
        return Ok(false);
    };
    match value.trim().to_lowercase().as_str() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        other => anyhow::bail!("{} must be true or false. Got: {}", name, other),
    }
}

/// Pick the record source; exactly one of file or table must be set
fn record_source(lookup: &impl Fn(&str) -> Option<String>) -> Result<RecordStoreConfig> {
    let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    match (
        present("IPPRESERVE_RECORDS_FILE"),
        present("IPPRESERVE_RECORDS_TABLE"),
    ) {
        (Some(path), None) => Ok(RecordStoreConfig::File { path }),
        (None, Some(table)) => Ok(RecordStoreConfig::DynamoDb {
            table,
            region: present("IPPRESERVE_RECORDS_REGION"),
        }),
        (Some(_), Some(_)) => anyhow::bail!(
            "IPPRESERVE_RECORDS_FILE and IPPRESERVE_RECORDS_TABLE are mutually exclusive"
        ),
        (None, None) => anyhow::bail!(
            "IPPRESERVE_RECORDS_FILE or IPPRESERVE_RECORDS_TABLE is required. \
            Set one via: export IPPRESERVE_RECORDS_TABLE=..."
        ),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            platform_url: required(&lookup, "IPPRESERVE_PLATFORM_URL")?,
            platform_username: required(&lookup, "IPPRESERVE_PLATFORM_USERNAME")?,
            platform_password: required(&lookup, "IPPRESERVE_PLATFORM_PASSWORD")?,
            accept_invalid_certs: flag(&lookup, "IPPRESERVE_ACCEPT_INVALID_CERTS")?,
            subnet_name: required(&lookup, "IPPRESERVE_SUBNET_NAME")?,
            records: record_source(&lookup)?,
            vm_match: parsed(&lookup, "IPPRESERVE_VM_MATCH")?.unwrap_or_default(),
            max_retries: parsed(&lookup, "IPPRESERVE_MAX_RETRIES")?,
            retry_delay_secs: parsed(&lookup, "IPPRESERVE_RETRY_DELAY_SECS")?,
            convergence_timeout_secs: parsed(&lookup, "IPPRESERVE_CONVERGENCE_TIMEOUT_SECS")?,
            mode: lookup("IPPRESERVE_MODE")
                .map(|mode| mode.trim().to_lowercase())
                .filter(|mode| !mode.is_empty())
                .unwrap_or_else(|| "live".to_string()),
            assume_yes: flag(&lookup, "IPPRESERVE_ASSUME_YES")?,
            log_level: lookup("IPPRESERVE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Human-readable record source
    fn records_source(&self) -> String {
        match &self.records {
            RecordStoreConfig::File { path } => format!("file {}", path),
            RecordStoreConfig::DynamoDb { table, .. } => format!("table {}", table),
            RecordStoreConfig::Inline { .. } => "inline records".to_string(),
        }
    }

    fn dry_run(&self) -> bool {
        self.mode == "dry-run"
    }

    /// Library configuration assembled from the environment
    fn to_core_config(&self) -> IpPreserveConfig {
        let mut platform = PlatformConfig::new(
            &self.platform_url,
            &self.platform_username,
            &self.platform_password,
        );
        platform.accept_invalid_certs = self.accept_invalid_certs;

        let mut orchestrator = OrchestratorConfig::new(&self.subnet_name)
            .with_vm_match(self.vm_match)
            .with_dry_run(self.dry_run());
        if let Some(max_retries) = self.max_retries {
            orchestrator.max_retries = max_retries;
        }
        if let Some(retry_delay) = self.retry_delay_secs {
            orchestrator.retry_delay_secs = retry_delay;
        }
        if let Some(timeout) = self.convergence_timeout_secs {
            orchestrator.convergence_timeout_secs = timeout;
        }

        IpPreserveConfig {
            platform,
            record_store: self.records.clone(),
            orchestrator,
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "live" | "dry-run" => {}
            other => anyhow::bail!(
                "IPPRESERVE_MODE '{}' is not valid. Valid modes: live, dry-run",
                other
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "IPPRESERVE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if let RecordStoreConfig::File { path } = &self.records
            && !std::path::Path::new(path).is_file()
        {
            anyhow::bail!(
                "IPPRESERVE_RECORDS_FILE does not point to a readable file: {}",
                path
            );
        }

        if self.platform_url.starts_with("http://") {
            eprintln!(
                "WARNING: IPPRESERVE_PLATFORM_URL uses HTTP (not HTTPS). \
                Credentials will be sent in clear text."
            );
        }

        self.to_core_config()
            .validate()
            .context("Invalid configuration")?;

        Ok(())
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return IpPreserveExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return IpPreserveExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpPreserveExitCode::ConfigError.into();
    }

    info!("Starting ippreserve");
    if config.dry_run() {
        warn!("Running in DRY-RUN mode - no VM will be modified");
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpPreserveExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Run aborted: {:#}", e);
                IpPreserveExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Wire configuration to the orchestrator and run it once
async fn run(config: Config) -> Result<IpPreserveExitCode> {
    let core_config = config.to_core_config();

    let store = ippreserve_core::store::from_config(&core_config.record_store);
    let client = Arc::new(
        PrismClient::new(&core_config.platform).context("Failed to create platform client")?,
    );

    let (orchestrator, events) = Orchestrator::new(
        store,
        client.clone(),
        client,
        core_config.orchestrator,
    )?;

    let records = orchestrator.load_records().await?;
    if records.is_empty() {
        println!("No preserved-IP records found in {}", config.records_source());
        return Ok(IpPreserveExitCode::Success);
    }

    println!(
        "{} VM(s) will have ALL NICs removed and one NIC on subnet '{}' attached{}:",
        records.len(),
        config.subnet_name,
        if config.dry_run() { " (dry-run)" } else { "" }
    );
    for record in &records {
        println!("  {} -> {}", record.instance_name, record.private_ip);
    }

    if !config.assume_yes && !config.dry_run() && !confirm().await? {
        println!("Aborted, no VM was modified");
        return Ok(IpPreserveExitCode::Aborted);
    }

    let total = records.len();
    let progress = tokio::spawn(print_progress(events, total));

    let report = orchestrator.run_with_records(records).await;

    // Closes the event channel so the progress printer finishes
    drop(orchestrator);
    let _ = progress.await;

    let report = report?;
    print_report(&report);

    if report.has_degraded() {
        Ok(IpPreserveExitCode::Degraded)
    } else {
        Ok(IpPreserveExitCode::Success)
    }
}

/// Ask the operator to continue; anything but yes declines
async fn confirm() -> Result<bool> {
    println!("Type 'yes' to continue:");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read confirmation from stdin")?;

    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Print one line per finished record
async fn print_progress(mut events: mpsc::Receiver<OrchestratorEvent>, total: usize) {
    let mut finished = 0;
    while let Some(event) = events.recv().await {
        if let OrchestratorEvent::RecordFinished {
            instance_name,
            outcome,
        } = event
        {
            finished += 1;
            println!("[{}/{}] {}: {}", finished, total, instance_name, outcome.label());
        }
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!(
        "Finished in {}s{}: {} attached, {} skipped, {} degraded",
        report.elapsed().num_seconds(),
        if report.dry_run { " (dry-run)" } else { "" },
        report.attached_count(),
        report.skipped_count(),
        report.degraded_count()
    );

    for entry in &report.records {
        if !entry.outcome.is_success() {
            println!("  {}: {}", entry.record.instance_name, entry.outcome);
        }
    }

    if report.has_degraded() {
        println!();
        println!("The following VMs may have no working NIC and need manual remediation:");
        for entry in report.degraded() {
            println!(
                "  {} (expected IP {})",
                entry.record.instance_name, entry.record.private_ip
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("IPPRESERVE_PLATFORM_URL", "https://pc.example:9440/api/nutanix/v3"),
            ("IPPRESERVE_PLATFORM_USERNAME", "admin"),
            ("IPPRESERVE_PLATFORM_PASSWORD", "secret"),
            ("IPPRESERVE_SUBNET_NAME", "Subnet1"),
            ("IPPRESERVE_RECORDS_FILE", "/tmp/records.json"),
        ]
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_lookup(lookup(&minimal())).unwrap();

        assert!(!config.dry_run());
        assert!(!config.assume_yes);
        assert_eq!(config.vm_match, VmMatchStrategy::RequireUnique);

        let core = config.to_core_config();
        assert_eq!(core.orchestrator.subnet_name, "Subnet1");
        assert_eq!(core.orchestrator.max_retries, 3);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn test_missing_password_is_reported() {
        let vars: Vec<_> = minimal()
            .into_iter()
            .filter(|(k, _)| *k != "IPPRESERVE_PLATFORM_PASSWORD")
            .collect();

        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("IPPRESERVE_PLATFORM_PASSWORD"));
    }

    #[test]
    fn test_overrides_are_applied() {
        let mut vars = minimal();
        vars.extend([
            ("IPPRESERVE_MODE", "DRY-RUN"),
            ("IPPRESERVE_VM_MATCH", "first-match"),
            ("IPPRESERVE_MAX_RETRIES", "5"),
            ("IPPRESERVE_CONVERGENCE_TIMEOUT_SECS", "300"),
            ("IPPRESERVE_ACCEPT_INVALID_CERTS", "yes"),
        ]);

        let config = Config::from_lookup(lookup(&vars)).unwrap();
        let core = config.to_core_config();

        assert!(core.orchestrator.dry_run);
        assert_eq!(core.orchestrator.vm_match, VmMatchStrategy::FirstMatch);
        assert_eq!(core.orchestrator.max_retries, 5);
        assert_eq!(core.orchestrator.convergence_timeout_secs, 300);
        assert!(core.platform.accept_invalid_certs);
    }

    #[test]
    fn test_unparseable_number_is_rejected() {
        let mut vars = minimal();
        vars.push(("IPPRESERVE_MAX_RETRIES", "many"));

        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("IPPRESERVE_MAX_RETRIES"));
    }

    #[test]
    fn test_unknown_mode_fails_validation() {
        let mut vars = minimal();
        vars.push(("IPPRESERVE_MODE", "yolo"));

        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert!(config.validate().is_err());
    }

    fn with_table(region: Option<&'static str>) -> Vec<(&'static str, &'static str)> {
        let mut vars: Vec<_> = minimal()
            .into_iter()
            .filter(|(k, _)| *k != "IPPRESERVE_RECORDS_FILE")
            .collect();
        vars.push(("IPPRESERVE_RECORDS_TABLE", "ec2-to-nc2-ip-preservation"));
        if let Some(region) = region {
            vars.push(("IPPRESERVE_RECORDS_REGION", region));
        }
        vars
    }

    #[test]
    fn test_records_table_selects_dynamodb() {
        let config = Config::from_lookup(lookup(&with_table(Some("ap-northeast-1")))).unwrap();
        config.validate().unwrap();

        match config.to_core_config().record_store {
            RecordStoreConfig::DynamoDb { table, region } => {
                assert_eq!(table, "ec2-to-nc2-ip-preservation");
                assert_eq!(region.as_deref(), Some("ap-northeast-1"));
            }
            other => panic!("expected a table source, got {:?}", other),
        }
        assert_eq!(config.records_source(), "table ec2-to-nc2-ip-preservation");
    }

    #[test]
    fn test_record_source_must_be_unique() {
        let mut both = with_table(None);
        both.push(("IPPRESERVE_RECORDS_FILE", "/tmp/records.json"));
        assert!(Config::from_lookup(lookup(&both)).is_err());

        let neither: Vec<_> = with_table(None)
            .into_iter()
            .filter(|(k, _)| *k != "IPPRESERVE_RECORDS_TABLE")
            .collect();
        let err = Config::from_lookup(lookup(&neither)).unwrap_err();
        assert!(err.to_string().contains("IPPRESERVE_RECORDS_TABLE"));
    }

    #[test]
    fn test_out_of_range_timeout_fails_validation() {
        let mut vars = with_table(None);
        vars.push(("IPPRESERVE_CONVERGENCE_TIMEOUT_SECS", "18446744073709551615"));

        let config = Config::from_lookup(lookup(&vars)).unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("Convergence timeout"));
    }

    #[test]
    fn test_password_not_exposed_in_debug() {
        let config = Config::from_lookup(lookup(&minimal())).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(IpPreserveExitCode::Success as u8, 0);
        assert_eq!(IpPreserveExitCode::ConfigError as u8, 1);
        assert_eq!(IpPreserveExitCode::RuntimeError as u8, 2);
        assert_eq!(IpPreserveExitCode::Degraded as u8, 3);
        assert_eq!(IpPreserveExitCode::Aborted as u8, 4);
    }
}
