//! Command-line tooling for meshid.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meshid_core::config::env_vars;
use meshid_core::{
    CandidateRecord, CapabilityId, Category, DatapointRule, DatapointValue, DeviceIdentity,
    MergeConfig, Transform,
};
use meshid_devices::protocol::{project_status, WarningRequest};
use meshid_devices::{decode, parse_frame, FingerprintRegistry, Level, MergeEngine, WarningMode};
use meshid_storage::FingerprintStore;
use serde_json::json;

/// meshid - Device identity resolution for mesh radio devices.
#[derive(Parser, Debug)]
#[command(name = "meshid")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Merge candidate feeds into the fingerprint registry.
    Merge {
        /// JSON files, each holding an array of candidate records.
        #[arg(required = true)]
        feeds: Vec<PathBuf>,
        /// Registry database to load before and save after merging.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Merge config (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the confidence threshold.
        #[arg(long)]
        threshold: Option<u8>,
    },
    /// Look up the identity serving a fingerprint.
    Lookup {
        manufacturer: String,
        product: String,
        /// Observed cluster id, used to break ties (repeatable).
        #[arg(long = "cluster", value_parser = parse_u16)]
        clusters: Vec<u16>,
        /// Registry database.
        #[arg(long, required = true)]
        db: PathBuf,
        /// Also consider identities that are not validated yet.
        #[arg(long)]
        all: bool,
    },
    /// Decode an IAS zone status word.
    DecodeStatus {
        /// Status word, decimal or 0x-prefixed hex.
        #[arg(value_parser = parse_u16)]
        word: u16,
        /// Project the bits onto the alarms of this category.
        #[arg(long)]
        category: Option<Category>,
    },
    /// Resolve a raw datapoint value through a transform.
    ResolveDp {
        dp: u16,
        #[arg(allow_negative_numbers = true)]
        raw: i64,
        /// Target capability, e.g. `measure_temperature`.
        #[arg(short, long)]
        capability: CapabilityId,
        /// Transform, e.g. `scale_div:10` or `enum:0=open,1=stop,2=close`.
        #[arg(short, long, default_value = "identity")]
        transform: Transform,
    },
    /// Encode a start-warning payload for a siren.
    EncodeWarning {
        /// stop, burglar, fire or emergency.
        mode: WarningMode,
        /// Duration in seconds.
        #[arg(long, default_value_t = 0)]
        duration: u16,
        /// Strobe duty cycle (0-100).
        #[arg(long, default_value_t = 0)]
        duty: u8,
        #[arg(long, default_value = "low")]
        strobe_level: Level,
        #[arg(long, default_value = "high")]
        siren_level: Level,
    },
    /// Parse a hex-encoded vendor datapoint frame.
    ParseFrame {
        payload: String,
    },
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid 16-bit value '{}': {}", s, e))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Merge {
            feeds,
            db,
            config,
            threshold,
        } => run_merge(feeds, db, config, threshold).await,
        Command::Lookup {
            manufacturer,
            product,
            clusters,
            db,
            all,
        } => run_lookup(&manufacturer, &product, clusters, db, all),
        Command::DecodeStatus { word, category } => decode_status(word, category),
        Command::ResolveDp {
            dp,
            raw,
            capability,
            transform,
        } => resolve_dp(dp, raw, capability, transform),
        Command::EncodeWarning {
            mode,
            duration,
            duty,
            strobe_level,
            siren_level,
        } => {
            let payload = WarningRequest::new(mode)
                .with_siren_level(siren_level)
                .with_duration(duration)
                .with_strobe(duty, strobe_level)
                .encode();
            println!("{}", hex::encode(payload));
            Ok(())
        }
        Command::ParseFrame { payload } => run_parse_frame(&payload),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = env_vars::log_json();
    let default_directive = if verbose { "meshid=debug" } else { "meshid=info" };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // Logs go to stderr so stdout stays machine-readable.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_registry(path: &Path) -> Result<(Arc<FingerprintRegistry>, Arc<FingerprintStore>)> {
    let store = FingerprintStore::open(path)
        .with_context(|| format!("opening registry {}", path.display()))?;
    let registry = Arc::new(FingerprintRegistry::new());
    registry.load_from(&store)?;
    Ok((registry, store))
}

async fn run_merge(
    feeds: Vec<PathBuf>,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    threshold: Option<u8>,
) -> Result<()> {
    let mut merge_config = match &config {
        Some(path) => MergeConfig::load(path)?,
        None => MergeConfig::from_env()?,
    };
    if let Some(threshold) = threshold {
        merge_config = merge_config.with_threshold(threshold);
    }
    merge_config.validate()?;

    // Feeds are read and parsed in parallel.
    let mut tasks = Vec::with_capacity(feeds.len());
    for path in feeds {
        tasks.push(tokio::task::spawn_blocking(move || -> Result<Vec<CandidateRecord>> {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading feed {}", path.display()))?;
            let candidates: Vec<CandidateRecord> = serde_json::from_str(&content)
                .with_context(|| format!("parsing feed {}", path.display()))?;
            tracing::debug!(feed = %path.display(), candidates = candidates.len(), "Read feed");
            Ok(candidates)
        }));
    }
    let mut batch = Vec::new();
    for task in tasks {
        batch.extend(task.await??);
    }

    let (registry, store) = match &db {
        Some(path) => {
            let (registry, store) = load_registry(path)?;
            (registry, Some(store))
        }
        None => (Arc::new(FingerprintRegistry::new()), None),
    };

    // One batch so corroboration counts sources across every feed.
    let engine = MergeEngine::new(registry.clone(), merge_config);
    let report = tokio::task::spawn_blocking(move || engine.merge(batch)).await??;

    if let Some(store) = store {
        registry.save_to(&store)?;
    }
    print_json(&report)
}

fn run_lookup(
    manufacturer: &str,
    product: &str,
    clusters: Vec<u16>,
    db: PathBuf,
    all: bool,
) -> Result<()> {
    let (registry, _store) = load_registry(&db)?;
    let clusters: BTreeSet<u16> = clusters.into_iter().collect();

    if all {
        let Some(found) = registry.lookup_for_merge(manufacturer, product, &clusters)? else {
            bail!("no identity matches {}/{}", manufacturer, product);
        };
        return print_json(&json!({
            "identity": found.identity,
            "matched_token": found.matched_token,
            "strength": format!("{:?}", found.strength),
            "redirected_from": found.redirected_from,
        }));
    }

    match registry.lookup(manufacturer, product, &clusters)? {
        Some(identity) => print_json(&identity),
        None => bail!("no validated identity matches {}/{}", manufacturer, product),
    }
}

fn decode_status(word: u16, category: Option<Category>) -> Result<()> {
    let flags = decode(word);
    let bits: Vec<String> = flags
        .active_bits()
        .iter()
        .map(|bit| format!("{:?}", bit))
        .collect();

    let mut output = json!({
        "word": format!("0x{:04x}", word),
        "bits": bits,
        "battery_alarm": flags.battery_alarm(),
    });
    if let Some(category) = category {
        let identity = DeviceIdentity::new("status", "-", "-")
            .with_category(category)
            .with_capabilities([
                category.primary_alarm(),
                CapabilityId::AlarmTamper,
                CapabilityId::AlarmBattery,
            ]);
        let alarms: serde_json::Map<String, serde_json::Value> = project_status(&identity, flags)
            .into_iter()
            .map(|update| (update.capability.to_string(), json!(update.value.as_bool())))
            .collect();
        output["alarms"] = serde_json::Value::Object(alarms);
    }
    print_json(&output)
}

fn resolve_dp(dp: u16, raw: i64, capability: CapabilityId, transform: Transform) -> Result<()> {
    let rule = DatapointRule::new(dp, capability, transform);
    let (capability, value) = rule.resolve(&DatapointValue::Value(raw))?;
    print_json(&json!({
        "dp": dp,
        "capability": capability,
        "value": value,
    }))
}

fn run_parse_frame(payload: &str) -> Result<()> {
    let cleaned: String = payload
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(cleaned.trim_start_matches("0x")).context("payload is not hex")?;
    let frame = parse_frame(&bytes);

    let records: Vec<serde_json::Value> = frame
        .records
        .iter()
        .map(|record| json!({ "dp": record.dp, "value": record.value }))
        .collect();
    print_json(&json!({
        "seq": frame.seq,
        "records": records,
        "trailing": frame.trailing,
    }))
}
