//! Quantized-artifact selection for repositories that ship multiple GGUF
//! files.

use lf_domain::identity::is_quantization_token;

/// Preference order when no explicit quantization is requested: balanced
/// 4-bit first, then progressively larger variants.
pub const QUANTIZATION_PREFERENCE_ORDER: &[&str] = &[
    "Q4_K_M", "Q4_K_S", "Q5_K_M", "Q5_K_S", "Q8_0", "Q6_K", "Q4_0", "F16", "F32",
];

/// Pull the quantization token out of a GGUF filename, e.g.
/// `qwen3-1.7b.Q4_K_M.gguf` → `Q4_K_M`.
pub fn parse_quantization_from_filename(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".gguf")?;
    let candidate = stem.rsplit(['.', '-']).next()?;
    let upper = candidate.to_ascii_uppercase();
    if is_quantization_token(&upper) && upper.chars().any(|c| c.is_ascii_digit()) {
        Some(upper)
    } else {
        None
    }
}

/// Select the best GGUF file from a repository listing.
///
/// A matching preferred quantization wins; otherwise the preference order
/// applies, and as a last resort the first file is returned (with a warning,
/// since the choice is then arbitrary).
pub fn select_gguf_file<'a>(
    gguf_files: &'a [String],
    preferred_quantization: Option<&str>,
) -> Option<&'a str> {
    if gguf_files.is_empty() {
        return None;
    }
    if gguf_files.len() == 1 {
        return Some(&gguf_files[0]);
    }

    let quantizations: Vec<Option<String>> = gguf_files
        .iter()
        .map(|f| parse_quantization_from_filename(f))
        .collect();

    if let Some(preferred) = preferred_quantization {
        let preferred = preferred.to_ascii_uppercase();
        if let Some(i) = quantizations
            .iter()
            .position(|q| q.as_deref() == Some(preferred.as_str()))
        {
            return Some(&gguf_files[i]);
        }
        tracing::warn!(
            preferred = %preferred,
            available = ?quantizations.iter().flatten().collect::<Vec<_>>(),
            "preferred quantization not found; falling back to default selection"
        );
    }

    for wanted in QUANTIZATION_PREFERENCE_ORDER {
        if let Some(i) = quantizations
            .iter()
            .position(|q| q.as_deref() == Some(*wanted))
        {
            return Some(&gguf_files[i]);
        }
    }

    tracing::warn!("no recognized quantization in file list; using first file");
    Some(&gguf_files[0])
}
