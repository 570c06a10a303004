//! Extraction prompt template and interpolation.
//!
//! The template is plain text with `{{product}}`, `{{target}}`, `{{industry}}`,
//! `{{company_name}}` and `{{content}}` placeholders. Jobs can supply their own
//! template through `JobConfig::extraction_prompt`; the output contract in the
//! built-in one is what [`super::parser`] expects.

use crate::types::ExtractionVariables;

/// Marker the model returns for pages that are not relevant.
pub const IGNORE_MARKER: &str = "IGNORAR";

/// Header row of the extraction output.
pub const OUTPUT_HEADER: &str =
    r#""Problem";"Persona";"Functional Cause";"Emotional Load";"Evidence";"Alternatives";"URL""#;

pub const DEFAULT_PRODUCT: &str = "nuestro producto";
pub const DEFAULT_TARGET: &str = "usuarios potenciales";
pub const DEFAULT_INDUSTRY: &str = "tecnología";
pub const DEFAULT_COMPANY_NAME: &str = "nuestra empresa";

/// Built-in extraction prompt (Spanish, like the search markets it serves).
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"Eres un analista de investigación de mercado. Lees conversaciones reales de foros para encontrar problemas concretos que viven las personas.

CONTEXTO
Producto: {{product}}
Público objetivo: {{target}}
Industria: {{industry}}
Empresa: {{company_name}}

CONTENIDO DE LA PÁGINA
{{content}}

INSTRUCCIONES
1. Si la página no contiene problemas reales relacionados con el producto o el público objetivo, responde únicamente:
IGNORAR - <motivo breve>

2. En caso contrario, devuelve una fila por cada problema distinto, en formato CSV separado por punto y coma, con todos los campos entre comillas dobles y las comillas internas duplicadas (""). Primera línea, la cabecera:
"Problem";"Persona";"Functional Cause";"Emotional Load";"Evidence";"Alternatives";"URL"

Campos:
- Problem: el problema concreto, en una frase.
- Persona: quién lo sufre (rol, situación).
- Functional Cause: qué lo provoca en la práctica.
- Emotional Load: cómo se siente la persona (frustración, miedo, cansancio...).
- Evidence: cita textual o paráfrasis fiel del contenido.
- Alternatives: lo que usa hoy para resolverlo, o "ninguna".
- URL: la URL de la fuente si aparece en el contenido; si no, déjala vacía.

No añadas texto antes ni después del CSV."#;

/// Interpolate `template` with the job's variables and the page content.
///
/// `content` is cut to `max_content_chars` characters first. Missing
/// variables fall back to generic defaults with a warning.
pub fn build_extraction_prompt(
    template: &str,
    variables: &ExtractionVariables,
    content: &str,
    max_content_chars: usize,
) -> String {
    let missing: Vec<&str> = [
        ("product", &variables.product),
        ("target", &variables.target),
        ("industry", &variables.industry),
        ("company_name", &variables.company_name),
    ]
    .iter()
    .filter(|(_, value)| is_blank(value))
    .map(|(name, _)| *name)
    .collect();

    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "extraction variables missing, using defaults");
    }

    template
        .replace("{{product}}", value_or(&variables.product, DEFAULT_PRODUCT))
        .replace("{{target}}", value_or(&variables.target, DEFAULT_TARGET))
        .replace("{{industry}}", value_or(&variables.industry, DEFAULT_INDUSTRY))
        .replace(
            "{{company_name}}",
            value_or(&variables.company_name, DEFAULT_COMPANY_NAME),
        )
        .replace("{{content}}", truncate_chars(content, max_content_chars))
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn value_or<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => v,
        _ => default,
    }
}
