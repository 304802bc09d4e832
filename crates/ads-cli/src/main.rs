//! Ad Screening CLI
//!
//! Loads filter lists from files or URLs and checks URLs or HTML snippets
//! against them, printing the deciding rule.

use std::fs;
use std::path::Path;
use std::time::Instant;

use clap::{Parser, Subcommand};

use ads_core::MediaType;
use ads_filter::{fetch_list, Filter, LoadStats, RuleCounts, Verdict};

#[derive(Parser)]
#[command(name = "ads-cli")]
#[command(about = "Ad filter list checker")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify request URLs
    Check {
        /// Filter list files or http(s) URLs
        #[arg(short, long, required = true)]
        list: Vec<String>,

        /// URL of the page the requests are made from
        #[arg(short, long, default_value = "https://example.com/")]
        top_url: String,

        /// image, media, subdocument or object
        #[arg(short, long, default_value = "image", value_parser = parse_media_type)]
        media_type: MediaType,

        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Classify an HTML snippet with the element rules
    CheckHtml {
        /// Filter list files or http(s) URLs
        #[arg(short, long, required = true)]
        list: Vec<String>,

        #[arg(short, long, default_value = "https://example.com/")]
        top_url: String,

        /// Outer HTML of the element
        html: String,
    },

    /// Print rule counts
    Stats {
        /// Filter list files or http(s) URLs
        #[arg(short, long, required = true)]
        list: Vec<String>,

        /// Print counts as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let result = match cli.command {
        Commands::Check {
            list,
            top_url,
            media_type,
            urls,
        } => cmd_check(&list, &top_url, media_type, &urls),
        Commands::CheckHtml { list, top_url, html } => cmd_check_html(&list, &top_url, &html),
        Commands::Stats { list, json } => cmd_stats(&list, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn parse_media_type(name: &str) -> Result<MediaType, String> {
    MediaType::from_name(name)
        .ok_or_else(|| format!("unknown media type '{}' (expected image, media, subdocument or object)", name))
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Read every list in order. Remote lists are fetched first, on one runtime.
fn read_lists(sources: &[String]) -> Result<Vec<(String, String)>, String> {
    let remote: Vec<&str> = sources.iter().map(String::as_str).filter(|s| is_remote(s)).collect();
    let mut fetched = if remote.is_empty() {
        Vec::new()
    } else {
        fetch_all(&remote)?
    }
    .into_iter();

    sources
        .iter()
        .map(|source| {
            let text = if is_remote(source) {
                fetched
                    .next()
                    .ok_or_else(|| format!("No content fetched for '{}'", source))?
            } else {
                fs::read_to_string(source).map_err(|e| format!("Failed to read '{}': {}", source, e))?
            };
            Ok((source.clone(), text))
        })
        .collect()
}

fn fetch_all(urls: &[&str]) -> Result<Vec<String>, String> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    let client = reqwest::Client::new();

    runtime.block_on(async {
        let mut texts = Vec::with_capacity(urls.len());
        for url in urls {
            texts.push(fetch_list(&client, url).await.map_err(|e| e.to_string())?);
        }
        Ok::<_, String>(texts)
    })
}

fn list_name(source: &str) -> String {
    if is_remote(source) {
        return source.to_string();
    }
    Path::new(source)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string())
}

fn load_filter(sources: &[String]) -> Result<(Filter, Vec<(String, LoadStats)>), String> {
    let start = Instant::now();
    let mut filter = Filter::new();
    let mut per_list = Vec::with_capacity(sources.len());

    for (source, text) in read_lists(sources)? {
        let stats = filter.add_rules_from_text(&text);
        per_list.push((list_name(&source), stats));
    }

    log::info!(
        "Loaded {} rules from {} lists in {:.1}ms",
        filter.rule_counts().total(),
        sources.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok((filter, per_list))
}

fn describe(subject: &str, verdict: Option<Verdict<'_>>) -> String {
    match verdict {
        Some(verdict) if verdict.is_ad() => format!("AD        {}  [{}]", subject, verdict.rule.raw()),
        Some(verdict) => format!("EXCEPTION {}  [{}]", subject, verdict.rule.raw()),
        None => format!("ok        {}", subject),
    }
}

fn cmd_check(lists: &[String], top_url: &str, media_type: MediaType, urls: &[String]) -> Result<(), String> {
    let (filter, _) = load_filter(lists)?;

    for url in urls {
        println!("{}", describe(url, filter.is_url_ad(url, top_url, media_type)));
    }
    Ok(())
}

fn cmd_check_html(lists: &[String], top_url: &str, html: &str) -> Result<(), String> {
    let (filter, _) = load_filter(lists)?;
    println!("{}", describe(html, filter.is_element_ad(html, top_url)));
    Ok(())
}

fn print_counts(label: &str, counts: &RuleCounts) {
    println!("{}", label);
    println!("  URL blacklist:      {}", counts.url_blacklist);
    println!("  URL whitelist:      {}", counts.url_whitelist);
    println!("  Element blacklist:  {}", counts.element_blacklist);
    println!("  Element whitelist:  {}", counts.element_whitelist);
}

fn cmd_stats(lists: &[String], json: bool) -> Result<(), String> {
    let (filter, per_list) = load_filter(lists)?;
    let counts = filter.rule_counts();

    if json {
        let output = serde_json::json!({
            "lists": per_list
                .iter()
                .map(|(name, stats)| serde_json::json!({ "name": name, "stats": stats }))
                .collect::<Vec<_>>(),
            "total": counts,
        });
        let text = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    for (name, stats) in &per_list {
        print_counts(&format!("{} (skipped {}, dropped {})", name, stats.skipped, stats.dropped), &stats.added);
    }
    println!();
    print_counts(&format!("Total: {} rules", counts.total()), &counts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_type() {
        assert_eq!(parse_media_type("IMAGE"), Ok(MediaType::Image));
        assert!(parse_media_type("script").is_err());
    }

    #[test]
    fn test_list_name() {
        assert_eq!(list_name("lists/easylist.txt"), "easylist.txt");
        assert_eq!(list_name("https://lists.example/easylist.txt"), "https://lists.example/easylist.txt");
    }

    #[test]
    fn test_describe() {
        let mut filter = Filter::new();
        filter.add_rules_from_text("||adserver.example^$image\n@@||adserver.example/safe.png$image\n");

        let url = "http://adserver.example/banner.png";
        assert_eq!(
            describe(url, filter.is_url_ad(url, "https://news.example.com/", MediaType::Image)),
            "AD        http://adserver.example/banner.png  [||adserver.example^$image]"
        );

        let url = "http://adserver.example/safe.png";
        assert!(describe(url, filter.is_url_ad(url, "https://news.example.com/", MediaType::Image))
            .starts_with("EXCEPTION"));

        let url = "http://cdn.example.com/logo.png";
        assert_eq!(
            describe(url, filter.is_url_ad(url, "https://news.example.com/", MediaType::Image)),
            "ok        http://cdn.example.com/logo.png"
        );
    }

    #[test]
    fn test_read_missing_list() {
        let err = read_lists(&["/nonexistent/list.txt".to_string()]).unwrap_err();
        assert!(err.starts_with("Failed to read '/nonexistent/list.txt'"));
    }
}
