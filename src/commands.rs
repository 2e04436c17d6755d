//! Implementations of the `brief` subcommands that print to stdout.

use anyhow::Result;

use crate::config::Config;
use crate::corpus::Corpus;
use crate::db;
use crate::llm::create_collaborators;
use crate::models::BriefPayload;
use crate::pipeline::Pipeline;

/// Open the corpus and wire the configured collaborators into a pipeline.
pub async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let pool = db::connect(config).await?;
    let collaborators = create_collaborators(&config.llm)?;
    Ok(Pipeline::new(Corpus::new(pool), config, collaborators))
}

pub async fn run_ask(config: &Config, question: &str, json: bool) -> Result<()> {
    if question.trim().is_empty() {
        anyhow::bail!("question must not be empty");
    }
    let pipeline = build_pipeline(config).await?;
    match pipeline.search(question, None, false, None).await? {
        Some(payload) => print_payload(&payload, json),
        None if json => print_payload(&BriefPayload::failed("no documents found for query"), true),
        None => {
            println!("No documents found.");
            Ok(())
        }
    }
}

pub async fn run_expand(
    config: &Config,
    document_id: i64,
    bullet: &str,
    parent_query: Option<&str>,
    json: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let payload = pipeline
        .expand_bullet(document_id, bullet, parent_query, None)
        .await?;
    print_payload(&payload, json)
}

fn print_payload(payload: &BriefPayload, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(payload)?);
        return Ok(());
    }
    if let Some(err) = &payload.error {
        println!("Error: {}", err);
        return Ok(());
    }
    if let Some(q) = &payload.reformulated_query {
        println!("Reformulated: {}\n", q);
    }
    println!("{}\n", payload.summary);

    if !payload.sources.is_empty() {
        println!("Sources:");
        for (i, s) in payload.sources.iter().enumerate() {
            let pages: Vec<String> = s.pages.iter().map(|p| p.to_string()).collect();
            println!(
                "  S{:<3} {} ({}) pages {} [doc {}]",
                i + 1,
                s.title,
                s.published_at,
                pages.join(","),
                s.document_id
            );
        }
        println!();
    }

    if !payload.inline_citations.is_empty() {
        println!("Citations:");
        for c in &payload.inline_citations {
            let mark = match c.valid {
                Some(true) => "ok",
                Some(false) => "unverified",
                None => "-",
            };
            println!(
                "  bullet {} S{} p{} [{}] \"{}\"",
                c.bullet, c.s, c.page, mark, c.quote
            );
        }
    }
    Ok(())
}

pub fn list_companies(config: &Config) {
    let universe = config.universe();
    println!("{:<8} {:<45} ALIASES", "TICKER", "LEGAL NAME");
    for entry in universe.entries() {
        println!(
            "{:<8} {:<45} {}",
            entry.ticker,
            entry.legal_name,
            entry.aliases.join(", ")
        );
    }
}
