//! End-to-end tests of the brief pipeline over throw-away SQLite corpora,
//! with the model-backed collaborators replaced by in-test stubs.

use anyhow::Result;
use async_trait::async_trait;
use research_brief::classify::{ClassifierVerdict, UseCase};
use research_brief::config::Config;
use research_brief::corpus::Corpus;
use research_brief::counts;
use research_brief::db;
use research_brief::migrate;
use research_brief::pipeline::Pipeline;
use research_brief::traits::{
    AnswerMode, AnswerRequest, AnsweringService, Collaborators, CompanyGuess, CompanyIdentifier,
    UseCaseClassifier,
};
use research_brief::universe::Universe;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const QUOTE: &str = "gross margin expanded 40 basis points in FY25";

// ─── Stub collaborators ─────────────────────────────────────────────

/// Replies with fixed text and remembers every request it saw.
struct Scripted {
    reply: String,
    rewrite: Option<String>,
    seen: Mutex<Vec<AnswerRequest>>,
}

impl Scripted {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            rewrite: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn rewriting(reply: &str, rewrite: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            rewrite: Some(rewrite.to_string()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<AnswerRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnsweringService for Scripted {
    async fn answer(&self, request: &AnswerRequest) -> Result<String> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }

    async fn reformulate(&self, query: &str, _page_one: &[String], _candidates: &str) -> Result<String> {
        Ok(self.rewrite.clone().unwrap_or_else(|| query.to_string()))
    }
}

/// Never answers in time.
struct Stalled;

#[async_trait]
impl AnsweringService for Stalled {
    async fn answer(&self, _request: &AnswerRequest) -> Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

struct NoCompany;

#[async_trait]
impl CompanyIdentifier for NoCompany {
    async fn identify(&self, _query: &str) -> Result<Option<CompanyGuess>> {
        Ok(None)
    }
}

struct Guess(CompanyGuess);

#[async_trait]
impl CompanyIdentifier for Guess {
    async fn identify(&self, _query: &str) -> Result<Option<CompanyGuess>> {
        Ok(Some(self.0.clone()))
    }
}

/// Always fails, so routing falls back to the keyword heuristic.
struct Offline;

#[async_trait]
impl UseCaseClassifier for Offline {
    async fn classify(
        &self,
        _query: &str,
        _universe: &Universe,
        _hint: Option<UseCase>,
    ) -> Result<ClassifierVerdict> {
        anyhow::bail!("classifier offline")
    }
}

/// Routes every question to use-case 2 with a fixed verdict.
struct Sector(ClassifierVerdict);

#[async_trait]
impl UseCaseClassifier for Sector {
    async fn classify(
        &self,
        _query: &str,
        _universe: &Universe,
        _hint: Option<UseCase>,
    ) -> Result<ClassifierVerdict> {
        Ok(self.0.clone())
    }
}

fn sector(related: &[&str], key_terms: &[&str]) -> Arc<Sector> {
    Arc::new(Sector(ClassifierVerdict {
        use_case: Some(UseCase::SectorMacro),
        confidence: Some(0.9),
        reason: Some("sector question".into()),
        related_companies: related.iter().map(|s| s.to_string()).collect(),
        key_terms: key_terms.iter().map(|s| s.to_string()).collect(),
    }))
}

fn collaborators(
    answerer: Arc<Scripted>,
    identifier: Arc<dyn CompanyIdentifier>,
) -> Collaborators {
    Collaborators {
        answerer,
        identifier,
        classifier: Arc::new(Offline),
    }
}

// ─── Corpus fixtures ────────────────────────────────────────────────

fn test_config(tmp: &TempDir, extra: &str) -> Config {
    let body = format!(
        "[db]\npath = \"{}\"\n{}",
        tmp.path().join("corpus.sqlite").display(),
        extra
    );
    toml::from_str(&body).unwrap()
}

async fn corpus_pool(cfg: &Config) -> SqlitePool {
    let pool = db::connect(cfg).await.unwrap();
    migrate::create_schema(&pool).await.unwrap();
    migrate::seed_universe(&pool, &cfg.universe()).await.unwrap();
    pool
}

async fn add_document(pool: &SqlitePool, id: i64, title: &str, published: &str, path: &str) {
    sqlx::query(
        "INSERT INTO document (document_id, title, published_at, file_uri, mime_type, meta) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(published)
    .bind(format!("file://{}", path))
    .bind("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
    .bind(json!({ "absolute_path": path }).to_string())
    .execute(pool)
    .await
    .unwrap();
}

async fn add_chunk(pool: &SqlitePool, document_id: i64, index: i64, page: i64, text: &str) {
    sqlx::query(
        "INSERT INTO chunk (document_id, text, chunk_index, page_start, page_end) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(document_id)
    .bind(text)
    .bind(index)
    .bind(page)
    .bind(page)
    .execute(pool)
    .await
    .unwrap();
}

async fn add_hits(pool: &SqlitePool, document_id: i64, ticker: &str, total: i64) {
    sqlx::query(
        "INSERT INTO company_term_count (document_id, company_id, name_hits, ticker_hits, alias_hits, total_hits)
         SELECT ?, company_id, ?, 0, 0, ? FROM ref_company WHERE ticker = ?",
    )
    .bind(document_id)
    .bind(total)
    .bind(total)
    .bind(ticker)
    .execute(pool)
    .await
    .unwrap();
}

/// Two JB Hi-Fi result documents; the newer one carries the margin quote.
async fn jbh_corpus(pool: &SqlitePool) {
    add_document(pool, 1, "JB Hi-Fi FY25 Results", "2025-08-11", "/reports/250811 JBH FY25.docx").await;
    add_chunk(pool, 1, 0, 1, "JB Hi-Fi Limited full year results.").await;
    add_chunk(pool, 1, 1, 7, "Group gross margin expanded 40 basis points in FY25 on category mix.").await;
    add_hits(pool, 1, "JBH", 14).await;

    add_document(pool, 2, "JB Hi-Fi FY24 Results", "2024-08-12", "/reports/240812 JBH FY24.docx").await;
    add_chunk(pool, 2, 0, 2, "Sales were broadly flat.").await;
    add_hits(pool, 2, "JBH", 20).await;
}

/// Three retail documents for sector questions. Document 1 has hit rows
/// for two companies, document 2 has none, document 3 only for Adairs.
async fn sector_corpus(pool: &SqlitePool) {
    add_document(pool, 1, "Retail wrap", "2024-05-01", "/reports/240501 wrap.docx").await;
    add_chunk(pool, 1, 0, 1, "Nick Scali and Adairs both saw softer furniture demand.").await;
    add_hits(pool, 1, "NCK", 3).await;
    add_hits(pool, 1, "ADH", 2).await;

    add_document(pool, 2, "Furniture outlook", "2025-02-01", "/reports/250201 furniture outlook.docx").await;
    add_chunk(pool, 2, 0, 1, "Household spending on furniture should recover in 2026.").await;

    add_document(pool, 3, "Adairs update", "2023-03-01", "/reports/230301 adh.docx").await;
    add_chunk(pool, 3, 0, 1, "Adairs lifted online sales.").await;
    add_hits(pool, 3, "ADH", 5).await;
}

const SECTOR_REPLY: &str = "- Furniture demand should recover [S1 p1 \"Household spending on furniture should recover in 2026\"]\n";

fn jbh_reply() -> String {
    format!(
        "- JBH lifted gross margin on mix [S1 p7 \"{q}\"]\n\
         CITATIONS(JSON)\n\
         [{{\"bullet\": 1, \"S\": 1, \"page\": 7, \"quote\": \"{q}\"}}]\n\
         Sources\n\
         - JB Hi-Fi FY25 Results — p.7 — \"{q}\"\n",
        q = QUOTE
    )
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ticker_question_builds_cited_brief() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    jbh_corpus(&pool).await;

    let answerer = Scripted::new(&jbh_reply());
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(answerer.clone(), Arc::new(NoCompany)),
    );

    let payload = pipeline
        .search("JBH outlook on gross margins", Some(5), false, Some("job-1"))
        .await
        .unwrap()
        .expect("documents for JBH");

    // Newest first: the FY25 document is S1 despite fewer hits.
    let ids: Vec<i64> = payload.sources.iter().map(|s| s.document_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(payload.sources[0].pages, vec![1, 7]);
    assert_eq!(payload.sources[0].url.as_deref(), Some("/view/job-1/1?page=1"));

    assert_eq!(payload.inline_citations.len(), 1);
    let c = &payload.inline_citations[0];
    assert_eq!((c.bullet, c.s, c.page), (1, 1, 7));
    assert_eq!(c.quote, QUOTE);
    assert_eq!(c.valid, Some(true));

    assert!(payload.summary_html.starts_with("<ul><li>"));
    assert!(payload.summary_html.contains("/view/job-1/1?page=7"));
    assert!(payload.summary_html.contains("<h4>Sources</h4>"));

    assert_eq!(payload.links.len(), 1);
    assert_eq!(payload.links[0].document_id, 1);
    assert_eq!(payload.links[0].pages, vec![7]);
    assert!(payload.links[0].url.starts_with("/view/job-1/1?page=7"));
    assert_eq!(payload.references[0].quote, QUOTE);
    assert!(payload.error.is_none());

    let requests = answerer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].use_case, UseCase::CompanySpecific);
    assert_eq!(requests[0].mode, AnswerMode::Brief);
    assert!(requests[0]
        .context
        .contains("[S1 p7] Group gross margin expanded 40 basis points"));
    assert!(requests[0].candidates_block.starts_with("1. JB Hi-Fi FY25 Results"));
}

#[tokio::test]
async fn out_of_range_marker_stays_unlinked() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    jbh_corpus(&pool).await;

    let reply = "- Margins widened [S1 p99 \"gross margin expanded\"] and [S5 p1 \"nothing\"]\n";
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(Scripted::new(reply), Arc::new(NoCompany)),
    );

    let payload = pipeline
        .search("JBH gross margins", None, false, Some("job-2"))
        .await
        .unwrap()
        .unwrap();

    // Recovered from the inline markers since there is no JSON block.
    assert_eq!(payload.inline_citations.len(), 2);
    assert!(payload.inline_citations.iter().all(|c| c.valid == Some(false)));
    assert!(!payload.summary_html.contains("href"));
    assert!(payload.summary_html.contains("[S1 p99]"));
}

#[tokio::test]
async fn off_book_company_uses_dynamic_scan() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    add_document(&pool, 3, "Baby Bunting trading update", "2025-02-18", "/reports/250218 BBN.docx").await;
    add_chunk(&pool, 3, 0, 1, "Baby Bunting opened four new stores. BBN shares rose.").await;
    add_document(&pool, 4, "Unrelated note", "2025-03-01", "/reports/250301 note.docx").await;
    add_chunk(&pool, 4, 0, 1, "Nothing about babies here.").await;

    let identifier = Arc::new(Guess(CompanyGuess {
        company_name: "Baby Bunting Group Limited".into(),
        short_name: "Baby Bunting".into(),
        aliases: vec!["BBN".into()],
    }));
    let reply = "- Four stores opened [S1 p1 \"Baby Bunting opened four new stores\"]\n";
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(Scripted::new(reply), identifier),
    );

    let payload = pipeline
        .search("Baby Bunting store rollout", None, false, None)
        .await
        .unwrap()
        .expect("off-book documents");

    assert_eq!(payload.sources.len(), 1);
    assert_eq!(payload.sources[0].document_id, 3);
    assert_eq!(payload.sources[0].company_id, Some(-1));
    assert_eq!(payload.sources[0].total_hits, 2);
    assert_eq!(payload.inline_citations[0].valid, Some(true));
    // Without a job the link falls back to the PDF next to the source.
    assert!(payload.sources[0]
        .url
        .as_deref()
        .is_some_and(|u| u.starts_with("file:///reports/250218%20BBN.pdf#page=1")));
}

#[tokio::test]
async fn no_documents_is_not_an_error() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;

    let answerer = Scripted::new("- unused");
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(answerer.clone(), Arc::new(NoCompany)),
    );

    let payload = pipeline
        .search("JBH outlook on gross margins", Some(5), false, None)
        .await
        .unwrap();
    assert!(payload.is_none());
    assert!(answerer.requests().is_empty());
}

#[tokio::test]
async fn legacy_chunk_table_is_read() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    sqlx::query("DROP TABLE chunk").execute(&pool).await.unwrap();
    sqlx::query(
        "CREATE TABLE doc_chunk (document_id INTEGER, chunk_idx INTEGER, content TEXT, page_no INTEGER)",
    )
    .execute(&pool)
    .await
    .unwrap();
    add_document(&pool, 1, "JB Hi-Fi FY25 Results", "2025-08-11", "/reports/250811 JBH FY25.docx").await;
    sqlx::query("INSERT INTO doc_chunk VALUES (1, 1, ?, 7), (1, 0, 'Cover page.', 1)")
        .bind("Group gross margin expanded 40 basis points in FY25.")
        .execute(&pool)
        .await
        .unwrap();
    add_hits(&pool, 1, "JBH", 3).await;

    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(Scripted::new(&jbh_reply()), Arc::new(NoCompany)),
    );
    let payload = pipeline
        .search("JBH gross margins", None, false, Some("job-3"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(payload.sources[0].pages, vec![1, 7]);
    assert_eq!(payload.inline_citations[0].valid, Some(true));
}

#[tokio::test]
async fn reformulation_rewrites_the_question() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    jbh_corpus(&pool).await;

    let answerer = Scripted::rewriting(&jbh_reply(), "How did JB Hi-Fi's FY25 gross margin move?");
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(answerer.clone(), Arc::new(NoCompany)),
    );

    let payload = pipeline
        .search("JBH margins", None, true, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        payload.reformulated_query.as_deref(),
        Some("How did JB Hi-Fi's FY25 gross margin move?")
    );
    assert_eq!(
        answerer.requests()[0].query,
        "How did JB Hi-Fi's FY25 gross margin move?"
    );
}

#[tokio::test]
async fn answered_questions_are_logged() {
    let tmp = TempDir::new().unwrap();
    let log_path = tmp.path().join("qa_log.txt");
    let cfg = test_config(&tmp, &format!("[log]\nqa_log = \"{}\"\n", log_path.display()));
    let pool = corpus_pool(&cfg).await;
    jbh_corpus(&pool).await;

    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(Scripted::new(&jbh_reply()), Arc::new(NoCompany)),
    );
    pipeline
        .search("JBH outlook on gross margins", None, false, None)
        .await
        .unwrap()
        .unwrap();

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Query:\nJBH outlook on gross margins"));
    assert!(log.contains("- JB Hi-Fi FY25 Results — p.7"));
}

#[tokio::test]
async fn expand_bullet_keeps_only_valid_first_source_citations() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    jbh_corpus(&pool).await;

    let reply = format!(
        "- Margin expansion came from mix [S1 p7 \"{q}\"]\n\
         CITATIONS(JSON)\n\
         [{{\"bullet\": 1, \"S\": 1, \"page\": 7, \"quote\": \"{q}\"}},\
          {{\"bullet\": 1, \"S\": 2, \"page\": 1, \"quote\": \"invented\"}},\
          {{\"bullet\": 1, \"S\": 1, \"page\": 7, \"quote\": \"not in the text\"}}]\n\
         Sources\n\
         - JB Hi-Fi FY25 Results — p.7 — \"{q}\"\n",
        q = QUOTE
    );
    let answerer = Scripted::new(&reply);
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(answerer.clone(), Arc::new(NoCompany)),
    );

    let payload = pipeline
        .expand_bullet(1, "JBH lifted gross margin on mix", Some("JBH outlook on gross margins"), Some("job-4"))
        .await
        .unwrap();

    assert!(payload.error.is_none());
    assert!(payload.sources.is_empty());
    assert!(payload.links.is_empty());
    assert_eq!(payload.inline_citations.len(), 1);
    assert_eq!(payload.inline_citations[0].quote, QUOTE);
    assert!(payload.summary_html.contains("/view/job-4/1?page=7"));
    assert!(payload.references.is_empty());
    assert!(!payload.summary.contains("Sources"));
    assert!(!payload.summary_html.contains("<h4>Sources</h4>"));

    let request = &answerer.requests()[0];
    assert_eq!(request.max_bullets, 1);
    assert_eq!(
        request.mode,
        AnswerMode::ExpandBullet {
            parent_query: Some("JBH outlook on gross margins".into())
        }
    );
}

#[tokio::test]
async fn expand_bullet_on_unknown_document_is_error_shaped() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;

    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        collaborators(Scripted::new("- unused"), Arc::new(NoCompany)),
    );
    let payload = pipeline.expand_bullet(404, "anything", None, None).await.unwrap();
    assert_eq!(payload.error.as_deref(), Some("document 404 not found"));
    assert!(payload.summary.is_empty());
}

#[tokio::test]
async fn slow_answering_service_times_out() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    jbh_corpus(&pool).await;

    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        Collaborators {
            answerer: Arc::new(Stalled),
            identifier: Arc::new(NoCompany),
            classifier: Arc::new(Offline),
        },
    )
    .with_answer_timeout(std::time::Duration::from_millis(50));

    let err = pipeline
        .search("JBH outlook on gross margins", None, false, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn sector_question_reads_whole_corpus_once_per_document() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    sector_corpus(&pool).await;

    let answerer = Scripted::new(SECTOR_REPLY);
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        Collaborators {
            answerer: answerer.clone(),
            identifier: Arc::new(NoCompany),
            classifier: sector(&[], &[]),
        },
    );

    let payload = pipeline
        .search("retail spending outlook into 2026", Some(5), false, None)
        .await
        .unwrap()
        .expect("corpus documents");

    let ids: Vec<i64> = payload.sources.iter().map(|s| s.document_id).collect();
    assert_eq!(ids, vec![2, 1, 3]);
    // Document 1 appears once, carrying its best company row.
    assert_eq!(payload.sources[1].total_hits, 3);
    assert_eq!(payload.sources[0].total_hits, 0);
    assert_eq!(answerer.requests()[0].use_case, UseCase::SectorMacro);
    assert_eq!(payload.inline_citations[0].valid, Some(true));
}

#[tokio::test]
async fn sector_question_with_related_companies_uses_their_hits() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    sector_corpus(&pool).await;

    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        Collaborators {
            answerer: Scripted::new(SECTOR_REPLY),
            identifier: Arc::new(NoCompany),
            classifier: sector(&["Nick Scali Limited"], &[]),
        },
    );

    let payload = pipeline
        .search("furniture retail outlook", None, false, None)
        .await
        .unwrap()
        .expect("related company documents");

    let ids: Vec<i64> = payload.sources.iter().map(|s| s.document_id).collect();
    assert_eq!(ids, vec![1]);
    assert_eq!(payload.sources[0].total_hits, 3);
}

#[tokio::test]
async fn sector_key_terms_join_the_term_rerank() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[retrieval]\ntop_k = 1\n");
    let pool = corpus_pool(&cfg).await;
    sector_corpus(&pool).await;

    let pick = |classifier: Arc<Sector>| {
        let pipeline = Pipeline::new(
            Corpus::new(pool.clone()),
            &cfg,
            Collaborators {
                answerer: Scripted::new(SECTOR_REPLY),
                identifier: Arc::new(NoCompany),
                classifier,
            },
        );
        async move {
            pipeline
                .search("retail spending outlook into 2026", None, false, None)
                .await
                .unwrap()
                .expect("one pick")
                .sources[0]
                .document_id
        }
    };

    // Hits alone favour the retail wrap; "furniture" in the title and
    // path of document 2 outweighs them once it is a key term.
    assert_eq!(pick(sector(&[], &[])).await, 1);
    assert_eq!(pick(sector(&[], &["furniture"])).await, 2);
}

#[tokio::test]
async fn sector_question_falls_back_to_dynamic_scan() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    sector_corpus(&pool).await;
    add_document(&pool, 5, "Nursery retail note", "2025-04-01", "/reports/250401 nursery.docx").await;
    add_chunk(&pool, 5, 0, 1, "Baby Bunting gained share in nursery retail.").await;

    let identifier = Arc::new(Guess(CompanyGuess {
        company_name: "Baby Bunting Group Limited".into(),
        short_name: "Baby Bunting".into(),
        aliases: vec![],
    }));
    let pipeline = Pipeline::new(
        Corpus::new(pool),
        &cfg,
        Collaborators {
            answerer: Scripted::new("- Share gains [S1 p1 \"Baby Bunting gained share in nursery retail\"]\n"),
            identifier,
            // Lovisa has no hit rows, so the company route comes back empty.
            classifier: sector(&["Lovisa Holdings Limited"], &[]),
        },
    );

    let payload = pipeline
        .search("nursery category outlook", None, false, None)
        .await
        .unwrap()
        .expect("off-book documents");

    assert_eq!(payload.sources.len(), 1);
    assert_eq!(payload.sources[0].document_id, 5);
    assert_eq!(payload.sources[0].company_id, Some(-1));
}

#[tokio::test]
async fn rebuilt_counts_feed_the_fast_path() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let pool = corpus_pool(&cfg).await;
    add_document(&pool, 1, "JB Hi-Fi FY25 Results", "2025-08-11", "/reports/250811 JBH FY25.docx").await;
    add_chunk(&pool, 1, 0, 1, "JB Hi-Fi Limited full year results.").await;
    add_chunk(&pool, 1, 1, 7, "Group gross margin expanded 40 basis points in FY25 on category mix.").await;
    add_document(&pool, 2, "Coles half year", "2025-02-20", "/reports/250220 COL HY25.docx").await;
    add_chunk(&pool, 2, 0, 1, "Coles Group Limited supermarket sales grew.").await;

    let corpus = Corpus::new(pool.clone());
    let pipeline = Pipeline::new(
        corpus.clone(),
        &cfg,
        collaborators(Scripted::new(&jbh_reply()), Arc::new(NoCompany)),
    );

    // No mention index yet: the fast path is empty and nothing is identified.
    assert!(pipeline
        .search("JBH outlook on gross margins", None, false, None)
        .await
        .unwrap()
        .is_none());

    let summary = counts::rebuild_counts(&pool).await.unwrap();
    assert_eq!(summary.documents, 2);
    assert_eq!(summary.rows, 2);

    let ids = corpus.resolve_company_ids(&["JBH".to_string()]).await.unwrap();
    let hits = corpus.hit_pool(&ids, 200).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, 1);
    assert!(hits[0].hits.total_hits > 0);

    let payload = pipeline
        .search("JBH outlook on gross margins", None, false, None)
        .await
        .unwrap()
        .expect("indexed documents");
    assert_eq!(payload.sources[0].document_id, 1);
    assert_eq!(payload.inline_citations[0].valid, Some(true));
}
