//! Invoice metadata extraction: NIT and invoice code from FEV pages.
//!
//! Electronic invoices in this domain print the issuer NIT and the invoice
//! code (`OCFE5871`-style) in the page header. The positional pass scans
//! header-band text blocks and prefers the candidate printed highest and
//! left-most on an invoice page; a plain-text pass over the concatenated FEV
//! text catches documents whose block coordinates are useless.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classify::rules::normalize;
use crate::error::{Result, TipificadorError};
use crate::pdf::{PageBlocks, PdfEngine};
use crate::store::ScratchStore;

static NIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bNIT\b\s*[:\-]?\s*([0-9\.\, ]{6,15}(?:\s*-\s*\d)?)")
        .expect("NIT regex compiles")
});
static OCFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bOCFE\s*(\d{3,})\b").expect("OCFE regex compiles"));
static INVOICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{3,6})\s*(\d{3,})\b").expect("invoice regex compiles"));

/// Tokens whose presence makes the general invoice-code regex trustworthy.
const INVOICE_HINTS: [&str; 8] = [
    "FACTURA", "ELECTR", "VENTA", "N°", "NO.", "NRO", "CUFE", "BUFE",
];

/// Prefixes that look like invoice codes but never are.
const REJECTED_PREFIXES: [&str; 3] = ["NIT", "CUFE", "CUDE"];

const FEV_HINT: &str = "FACTURA ELECTRONICA DE VENTA";
const NC_HINT: &str = "NOTA DE CREDITO ELECTRONICA";

/// Fraction of the page height considered the header for candidate search.
const HEADER_RATIO: f32 = 0.4;

/// What kind of document a FEV-classified page actually is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// A sales invoice proper.
    Fev,
    /// A credit note.
    Nc,
    Other,
}

/// Classify the page text for candidate preference.
pub fn page_kind(text: &str) -> PageKind {
    let upper = normalize(text);
    if upper.contains(FEV_HINT) {
        PageKind::Fev
    } else if upper.contains(NC_HINT) {
        PageKind::Nc
    } else {
        PageKind::Other
    }
}

/// Reduce a raw NIT capture to its base digits.
///
/// Accepts `900204617-5`, `900.204.617 - 5` or plain `900204617` and always
/// yields `900204617`: separators removed, the verification digit after the
/// hyphen dropped.
pub fn normalize_nit(raw: &str) -> String {
    let mut s = raw.trim().to_uppercase();
    s.retain(|ch| ch != '.' && ch != ',' && ch != ' ');
    let base = s.split('-').next().unwrap_or("");
    base.chars().filter(|ch| ch.is_ascii_digit()).collect()
}

/// Normalise an invoice code to `<PREFIX><digits>`.
///
/// Bare digits get the domain's default `OCFE` prefix. Prefixes that are
/// really other identifiers (NIT, CUFE, CUDE) are rejected.
pub fn normalize_invoice_code(raw: &str) -> Option<String> {
    let s: String = raw.trim().to_uppercase().replace(' ', "");
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|ch| ch.is_ascii_digit()) {
        return Some(format!("OCFE{s}"));
    }
    let captures = INVOICE_RE.captures(&s)?;
    let prefix = captures.get(1)?.as_str();
    if REJECTED_PREFIXES.contains(&prefix) {
        return None;
    }
    let digits: String = captures
        .get(2)?
        .as_str()
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{prefix}{digits}"))
}

/// One FEV page prepared for positional candidate search.
pub struct FevPage {
    pub kind: PageKind,
    pub blocks: PageBlocks,
}

struct Candidate {
    y: f32,
    x: f32,
    value: String,
    kind: PageKind,
}

fn pick(candidates: &[Candidate]) -> Option<String> {
    let best_of = |subset: Vec<&Candidate>| -> Option<String> {
        subset
            .into_iter()
            .min_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)))
            .map(|c| c.value.clone())
    };
    let fev: Vec<&Candidate> = candidates.iter().filter(|c| c.kind == PageKind::Fev).collect();
    best_of(fev).or_else(|| best_of(candidates.iter().collect()))
}

/// Positional search over the FEV page set.
pub fn extract_from_pages(pages: &[FevPage]) -> (Option<String>, Option<String>) {
    let mut nit_candidates: Vec<Candidate> = Vec::new();
    let mut invoice_candidates: Vec<Candidate> = Vec::new();

    for page in pages {
        for block in page.blocks.header_blocks(HEADER_RATIO) {
            let text = block.text.trim();
            if text.is_empty() {
                continue;
            }

            for captures in NIT_RE.captures_iter(text) {
                let nit = normalize_nit(&captures[1]);
                if nit.len() >= 6 {
                    nit_candidates.push(Candidate {
                        y: block.y,
                        x: block.x,
                        value: nit,
                        kind: page.kind,
                    });
                }
            }

            if let Some(captures) = OCFE_RE.captures(text)
                && let Some(code) = normalize_invoice_code(&format!("OCFE{}", &captures[1]))
            {
                invoice_candidates.push(Candidate {
                    y: block.y,
                    x: block.x,
                    value: code,
                    kind: page.kind,
                });
            }

            let upper = normalize(text);
            if INVOICE_HINTS.iter().any(|hint| upper.contains(hint)) {
                for m in INVOICE_RE.find_iter(&upper) {
                    if let Some(code) = normalize_invoice_code(m.as_str()) {
                        invoice_candidates.push(Candidate {
                            y: block.y,
                            x: block.x,
                            value: code,
                            kind: page.kind,
                        });
                    }
                }
            }
        }
    }

    (pick(&nit_candidates), pick(&invoice_candidates))
}

fn clamp_to_char_boundary(s: &str, mut index: usize, up: bool) -> usize {
    index = index.min(s.len());
    while index > 0 && index < s.len() && !s.is_char_boundary(index) {
        if up { index += 1 } else { index -= 1 }
    }
    index.min(s.len())
}

/// Plain-text fallback over the concatenated FEV text.
pub fn extract_from_text(text: &str) -> (Option<String>, Option<String>) {
    let norm = normalize(text);
    let mut invoice: Option<String> = None;

    // Prefer the neighbourhood of the invoice title when present.
    if let Some(idx) = norm.find(FEV_HINT) {
        let start = clamp_to_char_boundary(&norm, idx.saturating_sub(200), false);
        let end = clamp_to_char_boundary(&norm, idx + 2000, true);
        let window = &norm[start..end];
        if let Some(captures) = OCFE_RE.captures(window) {
            invoice = normalize_invoice_code(&format!("OCFE{}", &captures[1]));
        }
        if invoice.is_none()
            && let Some(m) = INVOICE_RE.find(window)
        {
            invoice = normalize_invoice_code(m.as_str());
        }
    }

    if invoice.is_none()
        && let Some(captures) = OCFE_RE.captures(&norm)
    {
        invoice = normalize_invoice_code(&format!("OCFE{}", &captures[1]));
    }
    if invoice.is_none()
        && INVOICE_HINTS.iter().any(|hint| norm.contains(hint))
        && let Some(m) = INVOICE_RE.find(&norm)
    {
        invoice = normalize_invoice_code(m.as_str());
    }

    let nit = NIT_RE
        .captures(&norm)
        .map(|captures| normalize_nit(&captures[1]))
        .filter(|nit| !nit.is_empty());

    (nit, invoice)
}

/// Resolves invoice metadata for a job's FEV pages, applying overrides.
#[derive(Clone)]
pub struct InvoiceResolver {
    store: ScratchStore,
    pdf: Arc<dyn PdfEngine>,
}

impl InvoiceResolver {
    pub fn new(store: ScratchStore, pdf: Arc<dyn PdfEngine>) -> Self {
        Self { store, pdf }
    }

    /// Resolve (NIT, invoice code) or fail `Unresolved` with whatever was
    /// detected so the caller can request manual input.
    pub async fn resolve(
        &self,
        job_id: &str,
        fev_pages: &[usize],
        nit_override: Option<&str>,
        ocfe_override: Option<&str>,
    ) -> Result<(String, String)> {
        let mut nit = nit_override
            .map(normalize_nit)
            .filter(|n| !n.is_empty());
        let mut invoice = ocfe_override.and_then(normalize_invoice_code);

        if nit.is_none() || invoice.is_none() {
            let meta = self.store.read_job_meta(job_id)?;
            let mut sources: Vec<(PathBuf, usize)> = Vec::with_capacity(fev_pages.len());
            for &global in fev_pages {
                let (pdf_idx, local) = meta
                    .resolve(global)
                    .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
                sources.push((self.store.source_pdf_path(job_id, pdf_idx), local));
            }

            let pdf = Arc::clone(&self.pdf);
            let (pages, texts) = tokio::task::spawn_blocking(move || {
                let mut pages = Vec::with_capacity(sources.len());
                let mut texts = Vec::with_capacity(sources.len());
                for (path, local) in &sources {
                    let text = pdf.page_text(path, *local)?;
                    let blocks = pdf.text_blocks(path, *local)?;
                    pages.push(FevPage { kind: page_kind(&text), blocks });
                    texts.push(text);
                }
                Ok::<_, TipificadorError>((pages, texts))
            })
            .await
            .map_err(|e| TipificadorError::internal(format!("metadata task panicked: {e}")))??;

            let (found_nit, found_invoice) = extract_from_pages(&pages);
            let (found_nit, found_invoice) = if found_nit.is_none() || found_invoice.is_none() {
                let joined = texts.join("\n");
                let (fallback_nit, fallback_invoice) = extract_from_text(&joined);
                (found_nit.or(fallback_nit), found_invoice.or(fallback_invoice))
            } else {
                (found_nit, found_invoice)
            };

            nit = nit.or(found_nit);
            invoice = invoice.or(found_invoice);
        }

        match (nit, invoice) {
            (Some(nit), Some(invoice)) => Ok((nit, invoice)),
            (nit, invoice) => Err(TipificadorError::Unresolved {
                nit_detected: nit,
                ocfe_detected: invoice,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::TextBlock;

    #[test]
    fn test_normalize_nit() {
        assert_eq!(normalize_nit("900.204.617 - 5"), "900204617");
        assert_eq!(normalize_nit("900204617-5"), "900204617");
        assert_eq!(normalize_nit("900204617"), "900204617");
    }

    #[test]
    fn test_normalize_invoice_code() {
        assert_eq!(normalize_invoice_code("OCFE 5871").as_deref(), Some("OCFE5871"));
        assert_eq!(normalize_invoice_code("5871").as_deref(), Some("OCFE5871"));
        assert_eq!(normalize_invoice_code("NIT900"), None);
        assert_eq!(normalize_invoice_code("CUFE123456"), None);
        assert_eq!(normalize_invoice_code("ECUC1890").as_deref(), Some("ECUC1890"));
        assert_eq!(normalize_invoice_code(""), None);
    }

    #[test]
    fn test_page_kind() {
        assert_eq!(page_kind("FACTURA ELECTRÓNICA DE VENTA"), PageKind::Fev);
        assert_eq!(page_kind("NOTA DE CREDITO ELECTRONICA"), PageKind::Nc);
        assert_eq!(page_kind("HISTORIA CLINICA"), PageKind::Other);
    }

    fn page(kind: PageKind, blocks: Vec<TextBlock>) -> FevPage {
        FevPage {
            kind,
            blocks: PageBlocks { width: 600.0, height: 800.0, blocks },
        }
    }

    #[test]
    fn test_positional_prefers_fev_page_then_topmost() {
        let pages = vec![
            page(
                PageKind::Nc,
                vec![TextBlock { x: 5.0, y: 10.0, text: "NIT: 111.222.333".into() }],
            ),
            page(
                PageKind::Fev,
                vec![
                    TextBlock { x: 40.0, y: 100.0, text: "NIT: 900.204.617-5".into() },
                    TextBlock { x: 10.0, y: 50.0, text: "FACTURA OCFE 5871".into() },
                ],
            ),
        ];
        let (nit, invoice) = extract_from_pages(&pages);
        // The credit-note candidate is higher on its page but loses to the
        // invoice page.
        assert_eq!(nit.as_deref(), Some("900204617"));
        assert_eq!(invoice.as_deref(), Some("OCFE5871"));
    }

    #[test]
    fn test_positional_ignores_blocks_below_header_band() {
        let pages = vec![page(
            PageKind::Fev,
            vec![TextBlock { x: 10.0, y: 700.0, text: "NIT: 900.204.617-5".into() }],
        )];
        let (nit, _) = extract_from_pages(&pages);
        assert_eq!(nit, None);
    }

    #[test]
    fn test_positional_general_code_needs_hint() {
        let no_hint = vec![page(
            PageKind::Fev,
            vec![TextBlock { x: 10.0, y: 10.0, text: "ECUC 1890".into() }],
        )];
        assert_eq!(extract_from_pages(&no_hint).1, None);

        let hinted = vec![page(
            PageKind::Fev,
            vec![TextBlock { x: 10.0, y: 10.0, text: "FACTURA ECUC 1890".into() }],
        )];
        assert_eq!(extract_from_pages(&hinted).1.as_deref(), Some("ECUC1890"));
    }

    #[test]
    fn test_text_fallback_window() {
        let text = "FACTURA ELECTRONICA DE VENTA\nNIT: 900.204.617-5\nOCFE 5871\n";
        let (nit, invoice) = extract_from_text(text);
        assert_eq!(nit.as_deref(), Some("900204617"));
        assert_eq!(invoice.as_deref(), Some("OCFE5871"));
    }

    #[test]
    fn test_text_fallback_without_title_uses_hints() {
        let text = "Factura de venta N° ECUC 1890 NIT: 800.100.200";
        let (nit, invoice) = extract_from_text(text);
        assert_eq!(nit.as_deref(), Some("800100200"));
        assert_eq!(invoice.as_deref(), Some("ECUC1890"));
    }

    #[test]
    fn test_text_fallback_empty() {
        let (nit, invoice) = extract_from_text("FACTURA");
        assert_eq!(nit, None);
        assert_eq!(invoice, None);
    }
}
