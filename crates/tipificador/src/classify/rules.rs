//! Deterministic page classification rules.
//!
//! Classification matches accent-stripped, uppercased substrings against an
//! ordered rule list. Scanned pages frequently lose diacritics or whole words
//! to OCR noise, so the rules are short distinctive phrases rather than full
//! titles, and the CRC table heuristic exists for attendance sheets whose
//! header row survives OCR but whose title does not.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::types::Category;

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b").expect("date regex compiles"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}:\d{2}\b").expect("time regex compiles"));

/// Strip combining accents (NFD, drop marks) and uppercase.
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect::<String>()
        .to_uppercase()
}

/// Column-header keyword groups of the CRC attendance table. A group counts
/// as present when any of its alternatives appears.
const CRC_HEADER_GROUPS: [&[&str]; 8] = [
    &["SERVICIO"],
    &["PRESTADOR"],
    &["TURNO"],
    &["HORA", "HORARIO"],
    &["NOMBRE"],
    &["TUTOR", "PACIENTE"],
    &["FIRMA"],
    &["N°", "N.", "NO.", "NRO"],
];

/// Heuristic for CRC attendance-table pages, on already-normalized text.
///
/// Pages carrying "FECHA CREACION" are form-style documents that share many
/// of the same column words; they are never table pages.
fn has_crc_table_hint(normalized: &str) -> bool {
    if normalized.contains("FECHA CREACION") {
        return false;
    }
    if !normalized.contains("CUIDADOR") {
        return false;
    }

    let groups_present = CRC_HEADER_GROUPS
        .iter()
        .filter(|group| group.iter().any(|kw| normalized.contains(kw)))
        .count();

    if groups_present == CRC_HEADER_GROUPS.len() {
        return true;
    }
    if groups_present >= 5 {
        return true;
    }

    // Degraded scans: rows of dates and times still identify the sheet.
    DATE_RE.find_iter(normalized).count() >= 2 && TIME_RE.find_iter(normalized).count() >= 2
}

/// Classify a text fragment, or `None` when no rule fires.
///
/// Pure: the same `text` and `allow_crc_table` always produce the same
/// result. The table heuristic only runs when `allow_crc_table` is set,
/// because it is too eager on PDFs that contain no attendance sheet at all.
pub fn classify_text(text: &str, allow_crc_table: bool) -> Option<Category> {
    if text.is_empty() {
        return None;
    }
    let t = normalize(text);

    // "DECISION" also covers "DECISIONES".
    if t.contains("ORDEN MEDICA") && t.contains("DECISION") {
        return Some(Category::OPF);
    }
    for hint in [
        "REGISTRO DE ACTIVIDADES DE CUIDADO",
        "HISTORIA CLINICA",
        "TRABAJO SOCIAL",
    ] {
        if t.contains(hint) {
            return Some(Category::HEV);
        }
    }
    if t.contains("ORDEN MEDICA") {
        return Some(Category::OPF);
    }
    if t.contains("DECISION")
        && ["MES INICIO", "MES", "DETALLES", "OBSERVACIONES"]
            .iter()
            .any(|kw| t.contains(kw))
    {
        return Some(Category::OPF);
    }
    if t.contains("AUTORIZACION SERVICIOS") {
        return Some(Category::PDE);
    }
    if t.contains("REGISTRO DE ATENCION DOMICILIARIA") {
        return Some(Category::CRC);
    }
    for hint in [
        "CERTIFICACION PRESTACION DE SERVICIOS",
        "CERTIFICACION DETALLE DE CARGOS",
    ] {
        if t.contains(hint) {
            return Some(Category::HEV);
        }
    }
    for hint in [
        "FACTURA ELECTRONICA DE VENTA",
        "NOTA DE CREDITO ELECTRONICA",
        "DETALLE DE CARGOS",
        "FACTURA OCFE",
    ] {
        if t.contains(hint) {
            return Some(Category::FEV);
        }
    }

    if allow_crc_table && has_crc_table_hint(&t) {
        return Some(Category::CRC);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents_and_uppercases() {
        assert_eq!(normalize("Atención Médica"), "ATENCION MEDICA");
        assert_eq!(normalize("Factura Electrónica"), "FACTURA ELECTRONICA");
    }

    #[test]
    fn test_accented_input_matches_plain_rules() {
        assert_eq!(
            classify_text("ORDEN MÉDICA DOMICILIARIA", false),
            Some(Category::OPF)
        );
        assert_eq!(
            classify_text("Registro de Atención Domiciliaria", false),
            Some(Category::CRC)
        );
    }

    #[test]
    fn test_orden_medica_with_decisions_is_opf() {
        assert_eq!(
            classify_text("ORDEN MEDICA ... DECISIONES DEL MES", false),
            Some(Category::OPF)
        );
    }

    #[test]
    fn test_hev_hints_win_over_bare_orden_medica() {
        // A clinical-history page may quote a medical order; the history
        // phrase must take priority.
        assert_eq!(
            classify_text("HISTORIA CLINICA - orden medica adjunta", false),
            Some(Category::HEV)
        );
    }

    #[test]
    fn test_opf_table_hint() {
        assert_eq!(
            classify_text("DECISION / MES INICIO / OBSERVACIONES", false),
            Some(Category::OPF)
        );
    }

    #[test]
    fn test_pde_and_fev_rules() {
        assert_eq!(
            classify_text("AUTORIZACION SERVICIOS No 123", false),
            Some(Category::PDE)
        );
        assert_eq!(
            classify_text("FACTURA ELECTRONICA DE VENTA OCFE 5871", false),
            Some(Category::FEV)
        );
        assert_eq!(
            classify_text("NOTA DE CRÉDITO ELECTRONICA", false),
            Some(Category::FEV)
        );
    }

    #[test]
    fn test_certificacion_detalle_is_hev_not_fev() {
        assert_eq!(
            classify_text("CERTIFICACION DETALLE DE CARGOS", false),
            Some(Category::HEV)
        );
        assert_eq!(
            classify_text("DETALLE DE CARGOS", false),
            Some(Category::FEV)
        );
    }

    #[test]
    fn test_crc_table_requires_flag() {
        let header = "N° SERVICIO PRESTADOR TURNO HORA NOMBRE TUTOR/PACIENTE FIRMA CUIDADOR";
        assert_eq!(classify_text(header, false), None);
        assert_eq!(classify_text(header, true), Some(Category::CRC));
    }

    #[test]
    fn test_crc_table_fallback_keywords() {
        // Five header groups plus CUIDADOR, no numbering marker.
        let text = "SERVICIO PRESTADOR TURNO HORARIO NOMBRE CUIDADOR";
        assert_eq!(classify_text(text, true), Some(Category::CRC));
    }

    #[test]
    fn test_crc_table_fallback_dates_and_times() {
        let text = "CUIDADOR 01/02/2024 03/02/2024 07:30 19:00";
        assert_eq!(classify_text(text, true), Some(Category::CRC));
    }

    #[test]
    fn test_fecha_creacion_vetoes_crc_table() {
        let text =
            "FECHA CREACION SERVICIO PRESTADOR TURNO HORA NOMBRE TUTOR FIRMA N° CUIDADOR";
        assert_eq!(classify_text(text, true), None);
    }

    #[test]
    fn test_crc_table_requires_cuidador() {
        let text = "SERVICIO PRESTADOR TURNO HORA NOMBRE TUTOR FIRMA N°";
        assert_eq!(classify_text(text, true), None);
    }

    #[test]
    fn test_empty_and_unmatched_text() {
        assert_eq!(classify_text("", true), None);
        assert_eq!(classify_text("texto cualquiera", true), None);
    }

    #[test]
    fn test_classifier_is_pure() {
        let text = "FACTURA ELECTRONICA DE VENTA";
        let a = classify_text(text, true);
        let b = classify_text(text, true);
        assert_eq!(a, b);
    }
}
