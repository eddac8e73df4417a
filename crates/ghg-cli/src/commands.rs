use std::path::PathBuf;

use anyhow::{bail, Context};
use colored::Colorize;
use ghg_index::record::{END_DATE_KEY, START_DATE_KEY};
use ghg_sdk::schema::infer_value;
use ghg_sdk::{
    search_many, DataStore, DeleteConfirmation, Filter, MetadataRecord, SeriesId, StoreConfig,
};

use crate::cli::*;
use crate::user_config::UserConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => UserConfig::default_path()?,
    };
    let ctx = Session {
        user: UserConfig::load(&config_path)?,
        config_path,
        store: cli.store,
        format: cli.format,
    };
    match cli.command {
        Command::Init(args) => cmd_init(&ctx, args),
        Command::AddStore(args) => cmd_add_store(&ctx, args),
        Command::Stores => cmd_stores(&ctx),
        Command::Check(args) => cmd_check(&ctx, args),
        Command::Search(args) => cmd_search(&ctx, args),
        Command::Info(args) => cmd_info(&ctx, args),
        Command::Delete(args) => cmd_delete(&ctx, args),
    }
}

struct Session {
    user: UserConfig,
    config_path: PathBuf,
    store: Option<String>,
    format: OutputFormat,
}

impl Session {
    fn open(&self) -> anyhow::Result<DataStore> {
        let root = self.user.resolve(self.store.as_deref());
        DataStore::open(&root).with_context(|| format!("opening store at {}", root.display()))
    }

    fn json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }
}

fn cmd_init(ctx: &Session, args: InitArgs) -> anyhow::Result<()> {
    let store = DataStore::init(&args.path, &StoreConfig::default())?;
    println!(
        "{} Initialized store in {}",
        "✓".green().bold(),
        args.path.display().to_string().bold()
    );
    println!("  Data kinds: {}", store.data_kinds().join(", ").cyan());
    if let Some(name) = args.name {
        let mut user = ctx.user.clone();
        user.add_store(&name, absolute(&args.path)?, false)?;
        user.save(&ctx.config_path)?;
        println!("  Registered as {}", name.yellow());
    }
    Ok(())
}

fn cmd_add_store(ctx: &Session, args: AddStoreArgs) -> anyhow::Result<()> {
    let path = absolute(&args.path)?;
    // Refuse paths that are not stores.
    DataStore::open(&path).with_context(|| format!("{} is not a store", path.display()))?;
    let mut user = ctx.user.clone();
    user.add_store(&args.name, path.clone(), args.default)?;
    user.save(&ctx.config_path)?;
    println!("Added store {} → {}", args.name.bold(), path.display().to_string().blue());
    Ok(())
}

fn cmd_stores(ctx: &Session) -> anyhow::Result<()> {
    if ctx.json() {
        println!("{}", serde_json::to_string_pretty(&ctx.user)?);
        return Ok(());
    }
    if ctx.user.stores.is_empty() {
        println!("No stores configured.");
    }
    for (name, path) in &ctx.user.stores {
        let marker = if ctx.user.default_store.as_deref() == Some(name.as_str()) { "*" } else { " " };
        println!("{} {} {}", marker.green().bold(), name.bold(), path.display());
    }
    Ok(())
}

fn cmd_check(ctx: &Session, args: CheckArgs) -> anyhow::Result<()> {
    let store = ctx.open()?;
    let report = store.check()?;
    if report.is_clean() {
        println!(
            "{} {} series, {} chunks, no issues ({} pending)",
            "✓".green().bold(),
            report.series_checked,
            report.chunks_checked,
            report.pending_chunks
        );
        return Ok(());
    }
    for issue in &report.issues {
        println!("  {} {issue}", "✗".red());
    }
    if args.prune {
        let summary = store.prune(&report)?;
        println!(
            "{} Pruned {} chunks and {} folders, kept {} written since the check",
            "✓".green(),
            summary.chunks,
            summary.folders,
            summary.kept
        );
        let remaining = report.issues.len() - report.prunable().count() + summary.kept;
        if remaining == 0 {
            return Ok(());
        }
        bail!("{remaining} issues need attention");
    }
    bail!("{} issues found", report.issues.len());
}

fn cmd_search(ctx: &Session, args: SearchArgs) -> anyhow::Result<()> {
    let filters = args
        .filters
        .iter()
        .map(|f| parse_filter(f))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let kind = args.kind.as_deref();

    let records: Vec<(Option<String>, MetadataRecord)> = if args.all_stores {
        let opened = ctx
            .user
            .stores
            .iter()
            .map(|(name, path)| -> anyhow::Result<(String, DataStore)> {
                Ok((name.clone(), DataStore::open(path)?))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let stores: Vec<&DataStore> = opened.iter().map(|(_, s)| s).collect();
        search_many(&stores, kind, &filters)?
            .into_iter()
            .map(|hit| (Some(opened[hit.store].0.clone()), hit.record))
            .collect()
    } else {
        let store = ctx.open()?;
        let found = if args.not {
            store.search_excluding(kind, &filters)?
        } else {
            store.search(kind, &filters)?
        };
        found.into_iter().map(|r| (None, r)).collect()
    };

    if ctx.json() {
        let fields: Vec<_> = records.iter().map(|(_, r)| r.fields()).collect();
        println!("{}", serde_json::to_string_pretty(&fields)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No matching series.");
    }
    for (store, record) in &records {
        print_summary(store.as_deref(), record);
    }
    Ok(())
}

fn cmd_info(ctx: &Session, args: InfoArgs) -> anyhow::Result<()> {
    let store = ctx.open()?;
    let id = SeriesId::parse(&args.series)?;
    let record = store.info(&args.kind, &id)?;
    if ctx.json() {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    print_summary(None, &record);
    for (key, value) in &record.series.descriptive_metadata {
        println!("  {key}: {value}");
    }
    let attributes = record.series.latest()?.attributes();
    if !attributes.is_empty() {
        println!("  {}", "attributes".bold());
        for (key, value) in &attributes {
            println!("    {key}: {value}");
        }
    }
    for label in record.series.labels() {
        let coverage = record.series.coverage(label)?;
        let marker = if label == record.latest_version { "*" } else { " " };
        println!("  {} {}", marker.green(), label.to_string().yellow());
        for interval in coverage {
            println!("      {interval}");
        }
    }
    println!("  revision: {}", record.revision);
    Ok(())
}

fn cmd_delete(ctx: &Session, args: DeleteArgs) -> anyhow::Result<()> {
    let store = ctx.open()?;
    let id = SeriesId::parse(&args.series)?;
    let Some(confirm) = &args.confirm else {
        let record = store.info(&args.kind, &id)?;
        print_summary(None, &record);
        bail!("deletion is permanent; re-run with --confirm {id}");
    };
    let confirmation = DeleteConfirmation::new(SeriesId::parse(confirm)?);
    let removed = store.delete_series(&args.kind, &id, confirmation)?;
    println!(
        "{} Deleted series {} ({} versions)",
        "✓".green().bold(),
        removed.series_id.to_string().yellow(),
        removed.series.versions.len()
    );
    Ok(())
}

fn print_summary(store: Option<&str>, record: &MetadataRecord) {
    let keys: Vec<String> = record
        .series
        .distinguishing_keys
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let span = match (record.field(START_DATE_KEY), record.field(END_DATE_KEY)) {
        (Some(start), Some(end)) => format!("{start} .. {end}"),
        _ => "no data".into(),
    };
    let prefix = store.map(|s| format!("[{s}] ")).unwrap_or_default();
    println!(
        "{prefix}{} {} {} {}",
        record.series_id.to_string().yellow(),
        record.data_kind.cyan(),
        keys.join(" "),
        span.dimmed()
    );
}

/// `key=value`, `key=a,b`, `key=lo..hi` (either side may be empty) or
/// `key`.
fn parse_filter(text: &str) -> anyhow::Result<Filter> {
    if let Some((key, value)) = text.split_once("!=") {
        let key = key.trim();
        if key.is_empty() {
            bail!("filter {text:?} has no key");
        }
        return Ok(Filter::not_eq(key, infer_value(value)));
    }
    let Some((key, value)) = text.split_once('=') else {
        if text.trim().is_empty() {
            bail!("empty filter");
        }
        return Ok(Filter::exists(text.trim()));
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("filter {text:?} has no key");
    }
    if let Some((lo, hi)) = value.split_once("..") {
        let bound = |s: &str| (!s.trim().is_empty()).then(|| infer_value(s));
        return Ok(Filter::range(key, bound(lo), bound(hi)));
    }
    if value.contains(',') {
        return Ok(Filter::any_of(key, value.split(',').map(infer_value)));
    }
    Ok(Filter::eq(key, infer_value(value)))
}

fn absolute(path: &std::path::Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghg_sdk::MetaValue;

    #[test]
    fn filter_forms() {
        assert_eq!(parse_filter("site=tac").unwrap(), Filter::eq("site", "tac"));
        assert_eq!(parse_filter("inlet=100").unwrap(), Filter::eq("inlet", 100.0));
        assert_eq!(
            parse_filter("site=tac,mhd").unwrap(),
            Filter::any_of("site", ["tac", "mhd"])
        );
        assert_eq!(
            parse_filter("inlet=..200").unwrap(),
            Filter::range("inlet", None, Some(MetaValue::Number(200.0)))
        );
        assert_eq!(parse_filter("domain").unwrap(), Filter::exists("domain"));
        assert_eq!(parse_filter("network != agage").unwrap(), Filter::not_eq("network", "agage"));
        assert!(parse_filter("!=agage").is_err());
        assert!(parse_filter("=x").is_err());
        assert!(parse_filter(" ").is_err());
    }

    #[test]
    fn init_registers_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Session {
            user: UserConfig::default(),
            config_path: dir.path().join("user.toml"),
            store: None,
            format: OutputFormat::Text,
        };
        let root = dir.path().join("store");
        cmd_init(
            &ctx,
            InitArgs {
                path: root.clone(),
                name: Some("local".into()),
            },
        )
        .unwrap();
        let user = UserConfig::load(&ctx.config_path).unwrap();
        assert_eq!(user.resolve(None), root);

        let ctx = Session { user, ..ctx };
        cmd_check(&ctx, CheckArgs { prune: false }).unwrap();
        assert!(cmd_delete(
            &ctx,
            DeleteArgs {
                series: SeriesId::new().to_string(),
                kind: "surface".into(),
                confirm: None,
            }
        )
        .is_err());
    }
}
