//! Server-side PDF text extraction.
//!
//! Used only when an upload carries the raw PDF without client-extracted
//! pages. Produces one string per page; rasterising pages is not done here,
//! so pages ingested this way have no snapshot image.

/// Extraction error. Never panics; callers mark the document failed.
#[derive(Debug)]
pub enum ExtractError {
    NotPdf,
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NotPdf => write!(f, "file is not a PDF"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// `true` when `bytes` start with the `%PDF-` header.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Extract the text of every page, in page order.
///
/// Trailing whitespace and form feeds are trimmed from each page.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    if !looks_like_pdf(bytes) {
        return Err(ExtractError::NotPdf);
    }

    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    Ok(pages
        .into_iter()
        .map(|p| p.trim_matches(|c: char| c.is_whitespace() || c == '\u{c}').to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_bytes() {
        assert!(matches!(extract_pages(b"hello"), Err(ExtractError::NotPdf)));
    }

    #[test]
    fn truncated_pdf_returns_error() {
        let r = extract_pages(b"%PDF-1.4 truncated");
        assert!(matches!(r, Err(ExtractError::Pdf(_))));
    }
}
