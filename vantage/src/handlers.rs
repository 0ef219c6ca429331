use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use vantage_core::treemap::subnets_from_nodes;
use vantage_core::{
    CacheStatus, Config, Element, ElementRef, ExpandContext, Explorer, LoadOutcome, NetworkCache,
    NodeType, SubnetInfo, TreemapBuilder,
};
use vantage_store::Neo4jClient;

/// Overrides `store.password` from the configuration file.
pub const PASSWORD_ENV: &str = "VANTAGE_STORE_PASSWORD";

/// `print_banner` sends this to stderr.
pub fn write_banner(out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "{} {}",
        "vantage".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    )?;
    writeln!(out, "{}", "progressive network topology explorer".bright_black())?;
    writeln!(out)
}

pub fn print_banner() {
    let _ = write_banner(&mut io::stderr());
}

pub fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

fn spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(msg.to_string());
    spinner
}

/// Expand a leading `~` to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

pub fn load_config(path: &str) -> Result<Config> {
    let path = resolve_path(path);
    Config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Parse `source:target` into an edge reference.
pub fn parse_edge_ref(value: &str) -> Result<ElementRef> {
    match value.split_once(':') {
        Some((source, target)) if !source.trim().is_empty() && !target.trim().is_empty() => {
            Ok(ElementRef::edge(source.trim(), target.trim()))
        }
        _ => Err(anyhow!("Invalid edge '{}': expected source:target", value)),
    }
}

/// Read a subnet dictionary: `{cidr: label}` or `{cidr: {label, vuln}}`.
pub fn load_subnet_file(path: &Path) -> Result<BTreeMap<String, SubnetInfo>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read subnet file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse subnet file {}", path.display()))
}

/// Configured expansion parameters with command-line overrides applied.
pub fn expand_context(
    config: &Config,
    cidr_base: Option<&String>,
    exclude: Option<&String>,
    timeout_secs: Option<u64>,
) -> ExpandContext {
    let mut ctx = config.topology.expand_context();
    if let Some(base) = cidr_base {
        ctx.cidr_base = base.clone();
    }
    if let Some(excluded) = exclude {
        ctx.excluded_cidr = Some(excluded.clone());
    }
    if let Some(secs) = timeout_secs {
        ctx.timeout = Duration::from_secs(secs);
    }
    ctx
}

pub fn open_cache(config: &Config) -> NetworkCache {
    NetworkCache::new(resolve_path(&config.cache.path), config.cache.ttl())
}

pub fn open_explorer(config: &Config) -> Result<Explorer<Neo4jClient>> {
    let password = std::env::var(PASSWORD_ENV)
        .ok()
        .or_else(|| config.store.password.clone());
    let client = Neo4jClient::with_timeout(
        &config.store.url,
        &config.store.database,
        config.store.timeout_secs,
    )
    .context("Failed to create graph store client")?
    .with_credentials(&config.store.username, password);

    Ok(Explorer::new(Arc::new(client), Arc::new(open_cache(config)))
        .with_organization(config.topology.organization.clone())
        .with_repopulate_on_stale(config.cache.repopulate_on_stale)
        .with_top_level_timeout(config.topology.expand_timeout()))
}

async fn start_explorer(config: &Config) -> Result<Explorer<Neo4jClient>> {
    let explorer = open_explorer(config)?;
    match explorer.start().await? {
        LoadOutcome::Fresh { nodes, edges } => println!(
            "{} Loaded cache: {} nodes, {} edges",
            "✓".green().bold(),
            nodes.to_string().cyan(),
            edges.to_string().cyan()
        ),
        LoadOutcome::Stale { age } => println!(
            "{} Cache expired ({:.1}h old) and was discarded",
            "⚠".yellow().bold(),
            age.as_secs_f64() / 3600.0
        ),
        LoadOutcome::Unreadable => println!(
            "{} Cache snapshot was unreadable and was discarded",
            "⚠".yellow().bold()
        ),
        LoadOutcome::Empty => {}
    }
    Ok(explorer)
}

/// One line per element, nodes first, in the order given.
pub fn render_elements(elements: &[Element]) -> String {
    let mut out = String::new();
    for element in elements {
        match element {
            Element::Node(node) => {
                out.push_str(&format!("{:<16} {:<8} {}", node.node_type.to_string(), node.id, node.label));
                if let Some(hosts) = node.hosts {
                    out.push_str(&format!("  hosts={}", hosts));
                }
                if let Some(vulns) = node.vulns {
                    out.push_str(&format!("  vulns={}", vulns));
                }
                if let Some(parent) = &node.parent {
                    out.push_str(&format!("  parent={}", parent));
                }
                out.push('\n');
            }
            Element::Edge(edge) => {
                out.push_str(&format!(
                    "{:<16} {:<8} {} -- {}\n",
                    edge.edge_type, edge.id, edge.source, edge.target
                ));
            }
        }
    }
    out
}

pub fn render_status(status: &CacheStatus) -> String {
    let age = status
        .age_hours
        .map(|h| format!("{:.2}h", h))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "snapshot: {}\nage: {}\nstale: {}\nnodes: {}\nedges: {}\n",
        if status.exists { "present" } else { "absent" },
        age,
        status.is_stale,
        status.node_count,
        status.edge_count
    )
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  VANTAGE INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let path_arg = args
        .get_one::<String>("PATH")
        .context("No configuration path given")?;
    let force = args.get_flag("force");
    let config_path = resolve_path(path_arg);

    println!(
        "{} Target: {}",
        "→".blue(),
        config_path.display().to_string().bright_white()
    );
    println!();

    if config_path.exists() && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!(
            "Configuration already exists at {}",
            config_path.display().to_string().bright_white()
        );
        let response = print_prompt("Overwrite it with the defaults? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
    }

    let config = Config::default();
    config
        .save(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!(
        "{} Config written: {}",
        "✓".green().bold(),
        config_path.display().to_string().bright_white()
    );

    let cache_path = resolve_path(&config.cache.path);
    if let Some(cache_dir) = cache_path.parent() {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("Failed to create {}", cache_dir.display()))?;
        println!(
            "{} Cache directory: {}",
            "✓".green().bold(),
            cache_dir.display().to_string().bright_white()
        );
    }

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    Ok(())
}

pub async fn handle_status(config: &Config) -> Result<()> {
    let cache = open_cache(config);
    let on_disk = cache.status().await;
    if on_disk.exists && !on_disk.is_stale {
        cache.load().await;
    }
    let status = cache.status().await;

    println!("{}", "CACHE STATUS".bright_blue().bold());
    println!(
        "{} {}",
        "Path:".blue(),
        cache.path().display().to_string().bright_white()
    );
    print!("{}", render_status(&status));
    Ok(())
}

pub async fn handle_refresh(config: &Config) -> Result<()> {
    let explorer = open_explorer(config)?;
    let progress = spinner("Refreshing cache from the graph store...");
    let result = explorer.refresh().await;
    progress.finish_and_clear();
    let elements = result?;
    explorer.shutdown().await;

    println!(
        "{} Cache rebuilt with {} top-level elements",
        "✓".green().bold(),
        elements.len().to_string().cyan()
    );
    Ok(())
}

pub async fn handle_top(config: &Config) -> Result<()> {
    let explorer = start_explorer(config).await?;
    let progress = spinner("Fetching organizations...");
    let result = explorer.fetch_top_level().await;
    progress.finish_and_clear();
    let elements = result?;
    explorer.shutdown().await;

    print!("{}", render_elements(&elements));
    Ok(())
}

pub async fn handle_expand(args: &ArgMatches, config: &Config) -> Result<()> {
    let node_id = args.get_one::<String>("id").context("--id is required")?;
    let node_type = args.get_one::<String>("type").context("--type is required")?;
    let ctx = expand_context(
        config,
        args.get_one::<String>("cidr-base"),
        args.get_one::<String>("exclude"),
        args.get_one::<u64>("timeout").copied(),
    );

    let explorer = start_explorer(config).await?;
    let progress = spinner(&format!("Expanding {} {}...", node_type, node_id));
    let result = explorer.expand(node_id, node_type, &ctx).await;
    progress.finish_and_clear();
    let elements = result?;
    explorer.shutdown().await;

    if elements.is_empty() {
        println!("{} No new data for {} {}", "→".blue(), node_type, node_id);
        return Ok(());
    }
    print!("{}", render_elements(&elements));
    Ok(())
}

pub async fn handle_collapse(args: &ArgMatches, config: &Config) -> Result<()> {
    let mut targets: Vec<ElementRef> = args
        .get_many::<String>("id")
        .into_iter()
        .flatten()
        .map(ElementRef::node)
        .collect();
    for edge in args.get_many::<String>("edge").into_iter().flatten() {
        targets.push(parse_edge_ref(edge)?);
    }
    if targets.is_empty() {
        bail!("Nothing to collapse: pass --id or --edge");
    }

    let explorer = start_explorer(config).await?;
    let stats = explorer.collapse(&targets).await;
    explorer.shutdown().await;

    println!(
        "{} Removed {} nodes and {} edges",
        "✓".green().bold(),
        stats.nodes_removed.to_string().cyan(),
        stats.edges_removed.to_string().cyan()
    );
    Ok(())
}

pub async fn handle_show(args: &ArgMatches, config: &Config) -> Result<()> {
    let format = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");

    let cache = open_cache(config);
    cache.load().await;
    let elements = cache.read_all().await;
    cache.flush().await;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&elements)?),
        _ => print!("{}", render_elements(&elements)),
    }
    Ok(())
}

pub async fn handle_treemap(args: &ArgMatches, config: &Config) -> Result<()> {
    let supernet = args
        .get_one::<String>("supernet")
        .unwrap_or(&config.treemap.supernet);
    let max_prefix = args
        .get_one::<u8>("max-prefix")
        .copied()
        .unwrap_or(config.treemap.max_prefix);

    let subnets = if args.get_flag("from-cache") {
        let cache = open_cache(config);
        cache.load().await;
        let subnets = subnets_from_nodes(&cache.nodes_of_type(NodeType::Subnet).await);
        cache.flush().await;
        subnets
    } else {
        let path = args
            .get_one::<PathBuf>("subnets")
            .ok_or_else(|| anyhow!("Either --subnets or --from-cache is required"))?;
        load_subnet_file(path)?
    };

    let treemap = TreemapBuilder::new(supernet)
        .with_context(|| format!("Invalid supernet '{}'", supernet))?
        .with_max_prefix(max_prefix)
        .build(&subnets)
        .context("Failed to build treemap")?;
    let json = serde_json::to_string_pretty(&treemap)?;

    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Treemap with {} ranges written to {}",
                "✓".green().bold(),
                treemap.node_count().to_string().cyan(),
                path.display().to_string().bright_white()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
