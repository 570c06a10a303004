//! Query planning and pre-flight estimates.
//!
//! Expands `life_contexts x product_words` into `site:`-scoped search
//! queries for every enabled source, and estimates search volume and cost
//! before anything is billed.

use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;
use crate::types::{EstimateHeuristics, JobConfig, PricingConfig, SourceType};

/// A topic forum matched against life contexts.
#[derive(Debug, Clone, Copy)]
pub struct ThematicForum {
    pub domain: &'static str,
    pub name: &'static str,
    pub related_contexts: &'static [&'static str],
}

/// Built-in topic forum catalogue.
pub const THEMATIC_FORUMS: &[ThematicForum] = &[
    ThematicForum {
        domain: "bodas.net",
        name: "Bodas.net",
        related_contexts: &["boda", "casamiento", "matrimonio", "novios", "novia", "novio", "wedding"],
    },
    ThematicForum {
        domain: "zankyou.es",
        name: "Zankyou",
        related_contexts: &["boda", "casamiento", "matrimonio", "novios"],
    },
    ThematicForum {
        domain: "bebesymas.com",
        name: "Bebés y más",
        related_contexts: &[
            "bebé", "bebés", "hijos", "niños", "embarazo", "maternidad", "paternidad", "familia",
        ],
    },
    ThematicForum {
        domain: "serpadres.es",
        name: "Ser Padres",
        related_contexts: &["hijos", "niños", "adolescentes", "familia", "padres"],
    },
    ThematicForum {
        domain: "enfemenino.com",
        name: "Enfemenino",
        related_contexts: &["familia", "pareja", "maternidad", "salud", "divorcio", "matrimonio"],
    },
    ThematicForum {
        domain: "rankia.com",
        name: "Rankia",
        related_contexts: &[
            "inversión", "ahorro", "finanzas", "dinero", "hipoteca", "jubilación", "autónomo",
            "empresa",
        ],
    },
    ThematicForum {
        domain: "finect.com",
        name: "Finect",
        related_contexts: &["inversión", "ahorro", "finanzas", "jubilación"],
    },
    ThematicForum {
        domain: "idealista.com/foro",
        name: "Foro Idealista",
        related_contexts: &["vivienda", "piso", "alquiler", "hipoteca", "mudanza", "comprar casa"],
    },
    ThematicForum {
        domain: "fotocasa.es/foro",
        name: "Foro Fotocasa",
        related_contexts: &["vivienda", "piso", "alquiler", "hipoteca"],
    },
    ThematicForum {
        domain: "tripadvisor.es",
        name: "TripAdvisor",
        related_contexts: &["vacaciones", "viaje", "turismo", "hotel"],
    },
    ThematicForum {
        domain: "losviajeros.com",
        name: "Los Viajeros",
        related_contexts: &["vacaciones", "viaje", "turismo"],
    },
    ThematicForum {
        domain: "forocoches.com",
        name: "Forocoches",
        related_contexts: &["coche", "trabajo", "empresa", "autónomo", "universidad", "estudiante"],
    },
    ThematicForum {
        domain: "mediavida.com",
        name: "Mediavida",
        related_contexts: &["universidad", "estudiante", "tecnología"],
    },
    ThematicForum {
        domain: "burbuja.info",
        name: "Burbuja.info",
        related_contexts: &["vivienda", "inversión", "ahorro", "hipoteca", "trabajo", "autónomo"],
    },
    ThematicForum {
        domain: "domestika.org",
        name: "Domestika",
        related_contexts: &["freelancer", "autónomo", "diseñador", "creativo"],
    },
    ThematicForum {
        domain: "infoautonomos.com",
        name: "Infoautónomos",
        related_contexts: &["autónomo", "freelancer", "empresa", "negocio"],
    },
];

/// Forums whose related contexts overlap `life_context` (containment either way).
pub fn find_thematic_forums(life_context: &str) -> Vec<&'static ThematicForum> {
    let context = life_context.to_lowercase();
    if context.is_empty() {
        return Vec::new();
    }
    THEMATIC_FORUMS
        .iter()
        .filter(|forum| {
            forum.related_contexts.iter().any(|related| {
                let related = related.to_lowercase();
                context.contains(&related) || related.contains(&context)
            })
        })
        .collect()
}

/// One concrete search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub life_context: String,
    pub product_word: String,
    pub indicator: Option<String>,
    pub source_type: SourceType,
    pub domain: String,
    pub query: String,
}

impl SearchQuery {
    fn new(
        life_context: &str,
        product_word: &str,
        indicator: Option<&str>,
        source_type: SourceType,
        domain: &str,
    ) -> Self {
        let mut query = format!("site:{domain} \"{life_context}\" \"{product_word}\"");
        if let Some(indicator) = indicator {
            query.push_str(&format!(" \"{indicator}\""));
        }
        Self {
            life_context: life_context.to_string(),
            product_word: product_word.to_string(),
            indicator: indicator.map(str::to_string),
            source_type,
            domain: domain.to_string(),
            query,
        }
    }
}

/// Pre-flight volume and cost estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub total_combinations: usize,
    pub total_queries: usize,
    /// Paged search calls: `total_queries x serp_pages`.
    pub total_searches: usize,
    pub estimated_urls: u64,
    pub serp_cost_usd: f64,
    pub scrape_cost_usd: f64,
    pub extraction_cost_usd: f64,
    pub total_cost_usd: f64,
}

/// Validated, expanded plan for one job.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub queries: Vec<SearchQuery>,
    pub serp_pages: u32,
    pub total_combinations: usize,
}

impl QueryPlan {
    pub fn estimate(&self, pricing: &PricingConfig, heuristics: &EstimateHeuristics) -> Estimate {
        let total_queries = self.queries.len();
        let total_searches = total_queries * self.serp_pages as usize;
        let raw = total_searches as f64
            * f64::from(heuristics.results_per_page)
            * heuristics.fill_rate
            * heuristics.dedup_rate;
        let estimated_urls = raw.round() as u64;

        let serp_cost_usd = total_searches as f64 * pricing.serp_per_search;
        let scrape_cost_usd = estimated_urls as f64 * pricing.scrape_per_page;
        let extraction_cost_usd = estimated_urls as f64 * pricing.extraction_per_url;

        Estimate {
            total_combinations: self.total_combinations,
            total_queries,
            total_searches,
            estimated_urls,
            serp_cost_usd,
            scrape_cost_usd,
            extraction_cost_usd,
            total_cost_usd: serp_cost_usd + scrape_cost_usd + extraction_cost_usd,
        }
    }
}

/// Builds query plans from job configs.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    pricing: PricingConfig,
    heuristics: EstimateHeuristics,
}

impl QueryPlanner {
    pub fn new(pricing: PricingConfig, heuristics: EstimateHeuristics) -> Self {
        Self {
            pricing,
            heuristics,
        }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn heuristics(&self) -> &EstimateHeuristics {
        &self.heuristics
    }

    /// Validate `config` and expand it into queries.
    ///
    /// Order: pair, then source (reddit, thematic matches, general forums),
    /// then base query followed by one query per indicator.
    pub fn plan(&self, config: &JobConfig) -> Result<QueryPlan, ConfigValidationError> {
        config.validate()?;
        let config = config.normalized();

        let mut queries = Vec::new();
        for life_context in &config.life_contexts {
            let mut sources: Vec<(SourceType, &str)> = Vec::new();
            if config.sources.reddit {
                sources.push((SourceType::Reddit, "reddit.com"));
            }
            if config.sources.thematic_forums {
                for forum in find_thematic_forums(life_context) {
                    sources.push((SourceType::ThematicForum, forum.domain));
                }
            }
            for domain in &config.sources.general_forums {
                sources.push((SourceType::GeneralForum, domain.as_str()));
            }

            for product_word in &config.product_words {
                for (source_type, domain) in &sources {
                    queries.push(SearchQuery::new(
                        life_context,
                        product_word,
                        None,
                        *source_type,
                        domain,
                    ));
                    for indicator in &config.indicators {
                        queries.push(SearchQuery::new(
                            life_context,
                            product_word,
                            Some(indicator),
                            *source_type,
                            domain,
                        ));
                    }
                }
            }
        }

        Ok(QueryPlan {
            queries,
            serp_pages: config.serp_pages,
            total_combinations: config.life_contexts.len() * config.product_words.len(),
        })
    }

    /// Plan and estimate in one step. Nothing is billed.
    pub fn estimate(&self, config: &JobConfig) -> Result<Estimate, ConfigValidationError> {
        self.heuristics.validate()?;
        Ok(self.plan(config)?.estimate(&self.pricing, &self.heuristics))
    }
}
