//! URL normalization and forum-quality scoring for search results.
//!
//! Normalization produces the per-job dedup key. Scoring keeps the URL set
//! focused on discussion pages: blog and news articles rarely carry the
//! first-person complaints the extractor looks for.

use url::Url;

/// Query parameters that never change page identity.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref", "ref_src"];

/// Path fragments typical of articles rather than discussions.
const BLOG_PATTERNS: &[&str] = &[
    "/blog/",
    "/article/",
    "/articulo/",
    "/post/",
    "/news/",
    "/noticias/",
    "/noticia/",
    "/magazine/",
    "/revista/",
    "/story/",
    "/stories/",
    "/guide/",
    "/guia/",
    "/tutorial/",
    "/how-to/",
    "/como-",
    "/tips/",
    "/consejos/",
    "/review/",
    "/reseña/",
    "/autor/",
    "/author/",
    "/category/",
    "/categoria/",
    "/tag/",
    "/etiqueta/",
    "/wp-content/",
    "/wp-json/",
    ".wordpress.",
    "/press/",
    "/prensa/",
    "/comunicado/",
];

/// Path fragments typical of forum threads.
const FORUM_PATTERNS: &[&str] = &[
    "/foro/",
    "/forum/",
    "/forums/",
    "/thread/",
    "/topic/",
    "/discussion/",
    "/discusion/",
    "/comunidad/",
    "/community/",
    "/comments/",
    "/comentarios/",
    "/pregunta/",
    "/question/",
    "/respuesta/",
    "/answer/",
    "/hilo/",
    "/debate/",
    "/showthread",
    "/viewtopic",
    "/t/",
    "/r/",
];

/// Discussion platforms. Entries with a path only match that section of the site.
pub const KNOWN_FORUM_DOMAINS: &[&str] = &[
    "reddit.com",
    "forocoches.com",
    "mediavida.com",
    "burbuja.info",
    "rankia.com",
    "htcmania.com",
    "mundodeportivo.com/foro",
    "enfemenino.com",
    "bebesymas.com",
    "bodas.net",
    "tripadvisor.es",
    "tripadvisor.com",
    "quora.com",
    "stackoverflow.com",
    "stackexchange.com",
    "groups.google.com",
    "discord.com",
    "domestika.org/comunidad",
    "idealista.com/foro",
    "fotocasa.es/foro",
    "elotrolado.net",
    "meristation.com/foro",
    "3djuegos.com/foros",
    "lawebdelcafe.com/foro",
    "foromotos.com",
    "clubaudi.com",
    "audisport-iberica.com",
    "bmwfaq.com",
    "clubgolf.net",
    "todoexpertos.com",
];

const KNOWN_BLOG_DOMAINS: &[&str] = &[
    "elpais.com",
    "elmundo.es",
    "abc.es",
    "lavanguardia.com",
    "elconfidencial.com",
    "xataka.com",
    "genbeta.com",
    "applesfera.com",
    "vidaextra.com",
    "trendencias.com",
    "directoalpaladar.com",
    "motorpasion.com",
    "espinof.com",
    "economipedia.com",
    "entrepreneur.com",
    "forbes.es",
    "forbes.com",
    "businessinsider.es",
    "emprendedores.es",
    "blog.",
    "medium.com",
    "substack.com",
    "hubspot.com",
    "mailchimp.com",
    "wikipedia.org",
    "wikihow.com",
];

/// Normalize a URL into its dedup key.
///
/// Lower-cases scheme and host, strips `www.`, drops the fragment and
/// tracking parameters, and trims the trailing slash. Returns `None` for
/// anything that is not an absolute http(s) URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut normalized = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{port}"));
    }

    let path = parsed.path().trim_end_matches('/');
    normalized.push_str(path);

    if !kept.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter())
            .finish();
        normalized.push('?');
        normalized.push_str(&query);
    }

    Some(normalized)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Score how likely a URL is a discussion page (0..=100, 50 neutral).
pub fn score_url_quality(url: &str) -> u8 {
    let lower = url.to_lowercase();
    let mut score: i32 = 50;

    if KNOWN_FORUM_DOMAINS.iter().any(|d| lower.contains(d)) {
        score += 30;
    }
    if FORUM_PATTERNS.iter().any(|p| lower.contains(p)) {
        score += 15;
    }
    if KNOWN_BLOG_DOMAINS.iter().any(|d| lower.contains(d)) {
        score -= 40;
    }
    if BLOG_PATTERNS.iter().any(|p| lower.contains(p)) {
        score -= 20;
    }

    score.clamp(0, 100) as u8
}

/// Why a URL looks like a blog/news article, if it does.
pub fn blog_reason(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    if let Some(domain) = KNOWN_BLOG_DOMAINS.iter().find(|d| lower.contains(*d)) {
        return Some(format!("known blog/news domain: {domain}"));
    }
    BLOG_PATTERNS
        .iter()
        .find(|p| lower.contains(*p))
        .map(|p| format!("blog/article pattern: {p}"))
}

/// Whether `domain` (possibly with a path) is a known discussion platform.
pub fn is_known_forum_domain(domain: &str) -> bool {
    let lower = domain.to_lowercase();
    KNOWN_FORUM_DOMAINS.iter().any(|d| lower.contains(d))
}

/// The `site:` target of a query, if any.
pub fn site_of_query(query: &str) -> Option<&str> {
    query
        .split_whitespace()
        .find_map(|token| token.strip_prefix("site:"))
        .filter(|site| !site.is_empty())
}

/// Quality gate applied to the results of one query.
#[derive(Debug, Clone, Copy)]
pub struct QualityFilter {
    min_score: u8,
    bypass: bool,
}

impl QualityFilter {
    /// Queries pinned to a known forum with `site:` are trusted as-is.
    pub fn for_query(query: &str, min_score: u8) -> Self {
        let bypass = site_of_query(query).is_some_and(is_known_forum_domain);
        Self { min_score, bypass }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn accepts(&self, url: &str) -> bool {
        self.bypass || score_url_quality(url) >= self.min_score
    }
}
