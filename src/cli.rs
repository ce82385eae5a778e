use std::cmp;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use atty::Stream;
use clap::{Parser, Subcommand, ValueEnum};
use folio_rs::packed::{DEFAULT_CACHE_CLUSTERS, text};
use folio_rs::web::{self, WebConfig, WebTheme};
use folio_rs::{
    Archive, Compression, Creator, Query, SearchResult, Searcher, SuggestionResult,
    SuggestionSearcher, WriterItem,
};
use once_cell::sync::Lazy;
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const DEFAULT_CLUSTER_SIZE: usize = 1 << 20;

#[derive(Parser, Debug)]
#[command(name = "folio-rs", about = "Read, search and serve packed document archives", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an archive over HTTP.
    Serve {
        /// Archive to serve.
        #[arg(short = 'z', long = "archive")]
        archive: PathBuf,
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// Styling for the shell and results pages.
        #[arg(long, value_enum, default_value_t = ThemeArg::Tailwind)]
        theme: ThemeArg,
        /// Decompressed clusters kept in memory.
        #[arg(long, default_value_t = DEFAULT_CACHE_CLUSTERS)]
        cache_clusters: usize,
    },
    /// Summarize an archive: entry count, main page, index and metadata.
    Info { archive: PathBuf },
    /// Print one item.
    Get {
        archive: PathBuf,
        /// Path inside the archive, without a leading slash.
        path: String,
        /// Show a redirect entry itself instead of its target.
        #[arg(long)]
        no_follow: bool,
    },
    /// Run a full-text query.
    Search {
        archive: PathBuf,
        query: String,
        /// Number of ranked results to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Maximum number of results to return.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Suggest titles for a partial query.
    Suggest {
        archive: PathBuf,
        query: String,
        /// Maximum number of suggestions to return.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Build an archive from a directory tree.
    Pack {
        /// Directory whose files become items.
        dir: PathBuf,
        /// Archive file to write.
        out: PathBuf,
        /// Landing page path; defaults to index.html when present.
        #[arg(long)]
        main: Option<String>,
        /// Skip the full-text index.
        #[arg(long)]
        no_index: bool,
        /// Store clusters uncompressed.
        #[arg(long)]
        no_compress: bool,
        /// Archive title; defaults to the directory name.
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        language: Option<String>,
        /// Target uncompressed cluster size in bytes.
        #[arg(long, default_value_t = DEFAULT_CLUSTER_SIZE)]
        cluster_size: usize,
        /// Log progress at info level.
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ThemeArg {
    Tailwind,
    Bootstrap,
}

impl From<ThemeArg> for WebTheme {
    fn from(value: ThemeArg) -> Self {
        match value {
            ThemeArg::Tailwind => WebTheme::Tailwind,
            ThemeArg::Bootstrap => WebTheme::Bootstrap,
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging();
    match cli.command {
        Command::Serve {
            archive,
            addr,
            theme,
            cache_clusters,
        } => handle_serve(WebConfig {
            addr,
            theme: theme.into(),
            archive,
            cache_clusters,
        }),
        Command::Info { archive } => handle_info(&archive, cli.json),
        Command::Get {
            archive,
            path,
            no_follow,
        } => handle_get(&archive, &path, !no_follow, cli.json),
        Command::Search {
            archive,
            query,
            offset,
            limit,
        } => handle_search(&archive, query, offset, limit, cli.json),
        Command::Suggest {
            archive,
            query,
            limit,
        } => handle_suggest(&archive, &query, limit, cli.json),
        Command::Pack {
            dir,
            out,
            main,
            no_index,
            no_compress,
            title,
            description,
            language,
            cluster_size,
            verbose,
        } => handle_pack(
            PackOptions {
                dir,
                out,
                main,
                index: !no_index,
                compress: !no_compress,
                title,
                description,
                language,
                cluster_size,
                verbose,
            },
            cli.json,
        ),
    }
}

/// Logs go to stderr so `--json` output stays clean. `RUST_LOG` overrides the
/// default `info` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_serve(config: WebConfig) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(web::serve(config))?;
    Ok(())
}

fn handle_info(path: &Path, as_json: bool) -> Result<(), Box<dyn Error>> {
    let archive = Archive::open(path)?;
    let entries = archive.entry_count()?;
    let main_path = match archive.main_entry() {
        Ok(entry) => Some(entry.resolve(true)?.path()?),
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err.into()),
    };
    let fulltext = archive.has_fulltext_index()?;
    let metadata: Vec<(String, String)> = archive
        .metadata_keys()?
        .into_iter()
        .filter_map(|key| archive.metadata(&key).ok().map(|value| (key, value)))
        .collect();

    if as_json {
        let payload = json!({
            "path": path.display().to_string(),
            "entries": entries,
            "main": main_path,
            "fulltext_index": fulltext,
            "metadata": metadata.iter().cloned().collect::<HashMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Archive: {}", path.display());
        println!("Entries: {entries}");
        println!("Main page: {}", main_path.as_deref().unwrap_or("<none>"));
        println!("Full-text index: {}", if fulltext { "yes" } else { "no" });
        if !metadata.is_empty() {
            let width = metadata
                .iter()
                .map(|(key, _)| key.len())
                .max()
                .unwrap_or(4)
                .max("NAME".len());
            println!("\n{:<width$}  {}", "NAME", "VALUE", width = width);
            println!("{:-<width$}  {}", "", "-----", width = width);
            for (key, value) in &metadata {
                println!("{:<width$}  {}", key, value, width = width);
            }
        }
    }
    archive.close();
    Ok(())
}

fn handle_get(
    path: &Path,
    item_path: &str,
    follow: bool,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let archive = Archive::open(path)?;
    let entry = archive.entry_by_path(item_path)?;
    let is_redirect = entry.is_redirect()?;
    let item = entry.resolve(follow)?;
    let mimetype = item.mimetype()?;
    let data = item.data()?;

    if as_json {
        let textual = mimetype.starts_with("text/") || mimetype.contains("json");
        let payload = json!({
            "path": item.path()?,
            "title": item.title()?,
            "mimetype": mimetype,
            "size": item.size()?,
            "redirect": is_redirect,
            "content": textual.then(|| String::from_utf8_lossy(&data).into_owned()),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Path: {}", item.path()?);
    println!("Title: {}", item.title()?);
    println!(
        "Mimetype: {}",
        if mimetype.is_empty() { "<none>" } else { &mimetype }
    );
    println!("Size: {} bytes", item.size()?);
    if is_redirect && follow {
        println!("Redirected from: {item_path}");
    }
    if mimetype.starts_with("text/markdown") {
        render_markdown_block("Content", &String::from_utf8_lossy(&data));
    } else if mimetype.starts_with("text/html") {
        println!("\n{}", text::strip_html(&String::from_utf8_lossy(&data)));
    } else if mimetype.starts_with("text/") {
        println!("\n{}", String::from_utf8_lossy(&data));
    } else if !data.is_empty() {
        println!("\n<{} bytes of binary data>", data.len());
    }
    Ok(())
}

fn handle_search(
    path: &Path,
    text: String,
    offset: usize,
    limit: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if text.trim().is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let limit = cmp::max(1, limit);
    let archive = Archive::open(path)?;
    let searcher = Searcher::new(&archive)?;
    let query = Query::new(text.clone())?;
    let search = searcher.search(&query)?;
    let estimated = search.estimated_matches()?;
    let results = search.results(offset, limit)?;

    if as_json {
        let payload = json!({
            "query": text,
            "offset": offset,
            "limit": limit,
            "estimated_matches": estimated,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_search_table(&text, estimated, &results);
    }
    Ok(())
}

fn handle_suggest(
    path: &Path,
    text: &str,
    limit: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let limit = cmp::max(1, limit);
    let archive = Archive::open(path)?;
    let suggestions = SuggestionSearcher::new(&archive)?;
    let results = suggestions.suggest_top(text, limit)?;

    if as_json {
        let payload = json!({
            "query": text,
            "limit": limit,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_suggestion_table(text, &results);
    }
    Ok(())
}

fn print_search_table(query: &str, estimated: u64, rows: &[SearchResult]) {
    if rows.is_empty() {
        println!("No documents matched \"{query}\".");
        return;
    }
    let width = rows
        .iter()
        .map(|row| row.path.len())
        .max()
        .unwrap_or(4)
        .max("PATH".len());
    println!("About {estimated} matches for \"{query}\":");
    println!("{:<width$}  {:>5}  {:>6}  {}", "PATH", "SCORE", "WORDS", "TITLE", width = width);
    println!("{:-<width$}  -----  ------  -----", "", width = width);
    for row in rows {
        println!(
            "{:<width$}  {:>5}  {:>6}  {}",
            row.path,
            row.score,
            row.word_count,
            strip_emphasis(&row.title),
            width = width
        );
    }
}

fn print_suggestion_table(query: &str, rows: &[SuggestionResult]) {
    if rows.is_empty() {
        println!("No titles matched \"{query}\".");
        return;
    }
    let width = rows
        .iter()
        .map(|row| row.path.len())
        .max()
        .unwrap_or(4)
        .max("PATH".len());
    println!("{:<width$}  {}", "PATH", "TITLE", width = width);
    println!("{:-<width$}  {}", "", "-----", width = width);
    for row in rows {
        println!("{:<width$}  {}", row.path, strip_emphasis(&row.title), width = width);
    }
}

fn strip_emphasis(text: &str) -> String {
    ["<b>", "</b>", "<i>", "</i>"]
        .iter()
        .fold(text.to_string(), |acc, tag| acc.replace(tag, ""))
}

struct PackOptions {
    dir: PathBuf,
    out: PathBuf,
    main: Option<String>,
    index: bool,
    compress: bool,
    title: Option<String>,
    description: Option<String>,
    language: Option<String>,
    cluster_size: usize,
    verbose: bool,
}

static MIME_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("html", "text/html"),
        ("htm", "text/html"),
        ("xhtml", "application/xhtml+xml"),
        ("css", "text/css"),
        ("js", "application/javascript"),
        ("mjs", "application/javascript"),
        ("json", "application/json"),
        ("txt", "text/plain"),
        ("md", "text/markdown"),
        ("markdown", "text/markdown"),
        ("xml", "application/xml"),
        ("svg", "image/svg+xml"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("webp", "image/webp"),
        ("ico", "image/x-icon"),
        ("pdf", "application/pdf"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("mp3", "audio/mpeg"),
        ("ogg", "audio/ogg"),
        ("mp4", "video/mp4"),
        ("webm", "video/webm"),
    ])
});

fn guess_mimetype(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .and_then(|ext| MIME_TYPES.get(ext.as_str()).copied())
        .unwrap_or("application/octet-stream")
}

fn handle_pack(options: PackOptions, as_json: bool) -> Result<(), Box<dyn Error>> {
    if !options.dir.is_dir() {
        return Err(format!("{} is not a directory", options.dir.display()).into());
    }
    let mut creator = Creator::start(&options.out)?;
    creator
        .config_compression(if options.compress {
            Compression::Zstd
        } else {
            Compression::None
        })
        .config_indexing(options.index)
        .config_cluster_size(options.cluster_size)
        .config_verbose(options.verbose);

    let mut has_index_html = false;
    let mut files = 0usize;
    for entry in WalkDir::new(&options.dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path() == options.out {
            continue;
        }
        let relative = entry.path().strip_prefix(&options.dir)?;
        let Some(item_path) = archive_path(relative) else {
            warn!(file = %entry.path().display(), "skipping file with a non UTF-8 name");
            continue;
        };
        let mimetype = guess_mimetype(entry.path());
        let item = if mimetype == "text/html" {
            let data = fs::read(entry.path())?;
            let title = text::html_title(&String::from_utf8_lossy(&data)).unwrap_or_default();
            WriterItem::from_bytes(item_path.clone(), title, mimetype, data).front_article(true)
        } else {
            let front = mimetype == "text/markdown" || mimetype == "text/plain";
            WriterItem::from_file(item_path.clone(), "", mimetype, entry.path())
                .front_article(front)
        };
        has_index_html |= item_path == "index.html";
        creator.add_item(item)?;
        files += 1;
    }

    let main = options
        .main
        .or_else(|| has_index_html.then(|| "index.html".to_string()));
    if let Some(main) = &main {
        creator.set_main_path(main.clone());
    }

    let title = options.title.unwrap_or_else(|| {
        options
            .dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    });
    creator.add_metadata("Title", title)?;
    if let Some(description) = options.description {
        creator.add_metadata("Description", description)?;
    }
    if let Some(language) = options.language {
        creator.add_metadata("Language", language)?;
    }
    creator.add_metadata("Scraper", concat!("folio-rs ", env!("CARGO_PKG_VERSION")))?;

    let stats = creator.finish()?;
    info!(files, out = %options.out.display(), "pack complete");

    if as_json {
        let payload = json!({
            "out": options.out.display().to_string(),
            "entries": stats.entries,
            "clusters": stats.clusters,
            "indexed": stats.indexed,
            "bytes": stats.bytes,
            "main": main,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Wrote {}", options.out.display());
        println!("Entries: {}", stats.entries);
        println!("Clusters: {}", stats.clusters);
        println!("Indexed documents: {}", stats.indexed);
        println!("Size: {} bytes", stats.bytes);
        println!("Main page: {}", main.as_deref().unwrap_or("<none>"));
    }
    Ok(())
}

/// Relative filesystem path as an archive path: `/`-separated, UTF-8.
fn archive_path(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
