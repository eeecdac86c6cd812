//! Command handlers. Each one takes the resolved configuration and the
//! parsed arguments of its subcommand.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use harvest_core::{Category, ClosureRequest, FeedQuery, HierarchyPolicy, OutputFormat};
use harvest_engine::{
    close_feed, list_pages, AtomicFileWriter, FeedSplitter, GroupFeedDocument, Harvester,
    HttpSession, ReqwestSession, XmlDocument,
};
use harvest_logging::{harvest_info, harvest_warn};

use crate::cli::{Cli, Command, GroupSubArgs};
use crate::config::ResolvedConfig;
use crate::session::{SessionStore, StoredSession};

pub async fn run(cli: Cli) -> Result<()> {
    let config = ResolvedConfig::load(&cli.global).context("loading configuration")?;
    match cli.command {
        Command::Feed { categories } => feed(&config, &categories).await,
        Command::FeedSplit { categories } => feed_split(&config, &categories),
        Command::GroupSub(args) => group_sub(&config, &args, &mut io::stdout().lock()),
        Command::Login { username, password } => login(&config, username, password).await,
        Command::Get { target, output } => get(&config, &target, output.as_deref()).await,
    }
}

async fn feed(config: &ResolvedConfig, categories: &[Category]) -> Result<()> {
    let stored = session_store(config).load_optional(&config.session)?;
    let base_url = base_url(config, stored.as_ref())?;
    let session = ReqwestSession::new(
        config.fetch_settings(),
        stored.as_ref().map(StoredSession::credentials),
    )?;

    let harvester = Harvester::new(&session, config.harvest_settings(base_url))?;
    let report = harvester.run(categories).await?;
    for stage in &report.stages {
        harvest_info!(
            "{}: {} quer{}, {} page(s){}",
            stage.category,
            stage.queries,
            if stage.queries == 1 { "y" } else { "ies" },
            stage.pages,
            if stage.skipped { " (skipped)" } else { "" }
        );
    }
    harvest_info!("Harvest finished: {} page(s) saved", report.pages());
    Ok(())
}

fn feed_split(config: &ResolvedConfig, categories: &[Category]) -> Result<()> {
    let splitter = FeedSplitter::new(config.base_dir.clone(), config.namespaces());
    for &category in categories {
        if config.dry_run {
            let pages = list_pages(&splitter.feed_dir(), category.as_str())?;
            harvest_info!(
                "[dry run] would split {} page(s) into {:?}",
                pages.len(),
                splitter.records_dir(category)
            );
            continue;
        }
        let summary = splitter
            .split(category)
            .with_context(|| format!("splitting {category} pages"))?;
        harvest_info!(
            "{}: {} record(s) from {} page(s), {} skipped; {} written, {} unchanged, {} removed",
            category,
            summary.records,
            summary.pages,
            summary.skipped,
            summary.mirror.copied,
            summary.mirror.unchanged,
            summary.mirror.removed
        );
    }
    Ok(())
}

fn group_sub(config: &ResolvedConfig, args: &GroupSubArgs, stdout: &mut dyn Write) -> Result<()> {
    let mut pages = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let text = fs::read_to_string(input)
            .with_context(|| format!("reading groups feed {input:?}"))?;
        let page = XmlDocument::parse(text, config.namespaces())
            .with_context(|| format!("parsing groups feed {input:?}"))?;
        pages.push(page);
    }
    let document = GroupFeedDocument::new(pages);

    let hierarchy = if args.reject_multi_parent {
        HierarchyPolicy::Reject
    } else {
        config.hierarchy
    };
    let mut request = ClosureRequest::new(&args.seeds)
        .with_output(args.format.into())
        .with_hierarchy(hierarchy);
    if args.parents {
        request = request.with_parents();
    }
    if args.children {
        request = request.with_children();
    }

    let result = close_feed(&document, &request)?;
    match (request.output, result.feed) {
        (OutputFormat::Feed, Some(filtered)) => {
            write_filtered_pages(&args.inputs, filtered, args.output.as_deref(), stdout)
        }
        _ => {
            let mut listing = String::new();
            for id in result.ids.ids() {
                listing.push_str(id);
                listing.push('\n');
            }
            emit(listing.as_bytes(), args.output.as_deref(), stdout)
        }
    }
}

fn write_filtered_pages(
    inputs: &[PathBuf],
    filtered: Vec<String>,
    output: Option<&Path>,
    stdout: &mut dyn Write,
) -> Result<()> {
    if let [page] = filtered.as_slice() {
        return emit(page.as_bytes(), output, stdout);
    }
    let Some(dir) = output else {
        bail!("filtering {} feed pages needs --output <DIR>", filtered.len());
    };
    let writer = AtomicFileWriter::new(dir.to_path_buf());
    for (input, page) in inputs.iter().zip(filtered) {
        let name = file_name(input)?;
        let path = writer.write(&name, page.as_bytes())?;
        harvest_info!("Wrote filtered page {:?}", path);
    }
    Ok(())
}

async fn login(config: &ResolvedConfig, username: String, password: Option<String>) -> Result<()> {
    let store = session_store(config);
    let previous = store.load_optional(&config.session)?;
    let base_url = base_url(config, previous.as_ref())?;
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let stored = StoredSession::new(base_url, username, password);

    let query = FeedQuery::new(&stored.base_url, config.per_page)?;
    if config.dry_run {
        harvest_info!(
            "[dry run] would check credentials of {:?} against {}",
            stored.username,
            query.base()
        );
        return Ok(());
    }
    let session = ReqwestSession::new(config.fetch_settings(), Some(stored.credentials()))?;
    session
        .get(query.base().as_str())
        .await
        .with_context(|| format!("checking credentials against {}", query.base()))?;

    let path = store.save(&config.session, &stored)?;
    harvest_info!("Logged in as {:?}; session saved to {:?}", stored.username, path);
    Ok(())
}

async fn get(config: &ResolvedConfig, target: &str, output: Option<&Path>) -> Result<()> {
    let stored = session_store(config).load_optional(&config.session)?;
    let base_url = base_url(config, stored.as_ref())?;
    let url = FeedQuery::new(&base_url, config.per_page)?.resolve(target)?;
    if config.dry_run {
        harvest_info!("[dry run] GET {}", url);
        return Ok(());
    }

    let session = ReqwestSession::new(
        config.fetch_settings(),
        stored.as_ref().map(StoredSession::credentials),
    )?;
    let response = session
        .get(url.as_str())
        .await
        .with_context(|| format!("GET {url}"))?;
    emit(&response.bytes, output, &mut io::stdout().lock())
}

fn session_store(config: &ResolvedConfig) -> SessionStore {
    SessionStore::new(config.session_dir.clone())
}

/// The configured base URL, else the one stored with the session.
fn base_url(config: &ResolvedConfig, stored: Option<&StoredSession>) -> Result<String> {
    config
        .base_url
        .clone()
        .or_else(|| stored.map(|session| session.base_url.clone()))
        .ok_or_else(|| {
            anyhow!(
                "no API base URL: pass --base-url, set HARVEST_BASE_URL or log in to session {:?}",
                config.session
            )
        })
}

fn read_password() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("reading password from standard input")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        harvest_warn!("Empty password read from standard input");
    }
    Ok(password)
}

fn emit(content: &[u8], output: Option<&Path>, stdout: &mut dyn Write) -> Result<()> {
    match output {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let written = AtomicFileWriter::new(dir).write(&file_name(path)?, content)?;
            harvest_info!("Wrote {:?}", written);
        }
        None => {
            stdout.write_all(content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{path:?} does not name a file"))
}
