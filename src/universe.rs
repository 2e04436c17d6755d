//! The coverage universe: the fixed set of listed companies the corpus is
//! organised around, with the free-text aliases each one goes by.
//!
//! Aliases are pure lookup data. They never own anything; they only point a
//! surface form ("Woolies", "JB Hi-Fi") at a ticker.

use serde::Deserialize;

use crate::lexical::contains_term;

/// One company in the coverage universe.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CompanyEntry {
    pub ticker: String,
    pub legal_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CompanyEntry {
    fn new(ticker: &str, legal_name: &str, aliases: &[&str]) -> Self {
        Self {
            ticker: ticker.to_string(),
            legal_name: legal_name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Terms whose presence marks a question as company-specific, including
/// brand sub-lines that are not themselves listed entities.
pub const COMPANY_TERMS: &[&str] = &[
    "woolworths", "wow", "asx:wow",
    "coles", "col", "asx:col",
    "jb hi-fi", "jbh", "jb hifi", "jbhifi", "asx:jbh",
    "bunnings",
    "wesfarmers", "wes", "asx:wes",
    "harvey norman", "hvn", "asx:hvn",
    "super retail", "sul", "asx:sul",
    "myer", "myr", "asx:myr",
    "premier investments", "pmv", "asx:pmv",
    "supercheap", "rebel", "bcf",
    "aldi", "kmart", "target", "officeworks", "big w", "dan murphy", "liquorland",
];

/// Built-in universe of listed Australian retailers.
pub fn builtin_entries() -> Vec<CompanyEntry> {
    vec![
        CompanyEntry::new("ADH", "Adairs Limited", &["Adairs"]),
        CompanyEntry::new("ALD", "Ampol Limited", &["Ampol"]),
        CompanyEntry::new("AX1", "Accent Group Limited", &["Accent Group", "Accent"]),
        CompanyEntry::new("BAP", "Bapcor Limited", &["Bapcor"]),
        CompanyEntry::new("BRG", "Breville Group Limited", &["Breville"]),
        CompanyEntry::new("CCX", "City Chic Collective Limited", &["City Chic", "CityChic"]),
        CompanyEntry::new("COL", "Coles Group Limited", &["Coles"]),
        CompanyEntry::new(
            "EDV",
            "Endeavour Group Limited",
            &["Endeavour", "Endeavour Group", "Dan Murphy's", "BWS"],
        ),
        CompanyEntry::new("DSK", "Dusk Group Limited", &["Dusk"]),
        CompanyEntry::new(
            "HVN",
            "Harvey Norman Holdings Limited",
            &["Harvey Norman", "HarveyNorman"],
        ),
        CompanyEntry::new(
            "JBH",
            "JB Hi-Fi Limited",
            &["JB Hi-Fi", "JBHIFI", "JB HiFi", "JBHiFi", "JB Hifi", "JB"],
        ),
        CompanyEntry::new("LOV", "Lovisa Holdings Limited", &["Lovisa"]),
        CompanyEntry::new("MTS", "Metcash Limited", &["Metcash", "IGA"]),
        CompanyEntry::new("MYR", "Myer Holdings Limited", &["Myer"]),
        CompanyEntry::new("NCK", "Nick Scali Limited", &["Nick Scali", "NickScali"]),
        CompanyEntry::new(
            "PMV",
            "Premier Investments Limited",
            &["Premier Investments", "Premier"],
        ),
        CompanyEntry::new("SIG", "Sigma Healthcare Limited", &["Sigma"]),
        CompanyEntry::new(
            "SUL",
            "Super Retail Group Limited",
            &["Super Retail", "SuperRetail", "SRG"],
        ),
        CompanyEntry::new(
            "TPW",
            "Temple & Webster Group Ltd",
            &["Temple & Webster", "Temple&Webster", "Temple and Webster", "T+W"],
        ),
        CompanyEntry::new("VEA", "Viva Energy Group Limited", &["Viva", "Viva Energy", "VivaEnergy"]),
        CompanyEntry::new("WES", "Wesfarmers Limited", &["Wesfarmers", "Wes"]),
        CompanyEntry::new(
            "WOW",
            "Woolworths Group Limited",
            &["Woolworths", "Woolies", "Woolworths Group"],
        ),
    ]
}

/// Immutable lookup over the coverage universe.
#[derive(Debug, Clone)]
pub struct Universe {
    entries: Vec<CompanyEntry>,
}

impl Universe {
    pub fn new(entries: Vec<CompanyEntry>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_entries())
    }

    pub fn entries(&self) -> &[CompanyEntry] {
        &self.entries
    }

    pub fn get(&self, ticker: &str) -> Option<&CompanyEntry> {
        self.entries
            .iter()
            .find(|e| e.ticker.eq_ignore_ascii_case(ticker))
    }

    pub fn legal_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.legal_name.clone()).collect()
    }

    /// Aliases and legal names for the given tickers, followed by the
    /// literal tickers themselves. Order is preserved, duplicates dropped.
    pub fn cues_for_tickers(&self, tickers: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for ticker in tickers {
            if let Some(entry) = self.get(ticker) {
                out.extend(entry.aliases.iter().cloned());
                out.push(entry.legal_name.clone());
            }
        }
        out.extend(tickers.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        out.retain(|s| seen.insert(s.clone()));
        out
    }

    /// Every alias, legal name and ticker that appears (case-insensitive
    /// substring) in the raw query.
    pub fn cues_in_query(&self, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        let mut out: Vec<String> = Vec::new();
        for entry in &self.entries {
            let surfaces = entry
                .aliases
                .iter()
                .chain(std::iter::once(&entry.legal_name))
                .chain(std::iter::once(&entry.ticker));
            for surface in surfaces {
                if !surface.is_empty()
                    && lowered.contains(&surface.to_lowercase())
                    && !out.contains(surface)
                {
                    out.push(surface.clone());
                }
            }
        }
        out
    }

    /// Tickers whose legal name is in `names` (exact match).
    pub fn tickers_for_names(&self, names: &[String]) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| names.iter().any(|n| n.trim() == e.legal_name))
            .map(|e| e.ticker.clone())
            .collect()
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Whether the query mentions any known company term.
pub fn mentions_company_term(query: &str) -> bool {
    let lowered = query.to_lowercase();
    COMPANY_TERMS
        .iter()
        .any(|term| contains_term(&lowered, term))
}
