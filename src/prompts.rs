//! System prompts and user-message builders for every inference stage.
//!
//! Prompts are plain `&'static str` constants so tests can assert on their
//! wording without a provider.
//!
//! Each prompt demands a single JSON object so the caller can parse the
//! answer strictly; the shape of that object is the contract with the
//! matching parser in [`crate::pipeline`].

/// Phrase every code lookup query must contain.
pub const QUERY_TRIGGER: &str = "ICD-10 code";

/// Page-boundary marker prefix inserted by the combiner.
pub const PAGE_MARKER_PREFIX: &str = "<!-- BEGIN PAGE: p. ";

/// Render the page-boundary marker for a 1-based page number.
pub fn page_marker(page_number: usize) -> String {
    format!("{PAGE_MARKER_PREFIX}{page_number} -->")
}

/// Per-page transcription of a scanned clinic document.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You transcribe scanned clinic documents (visit notes, referrals, lab reports) for manual data entry.

You receive an image of ONE page. Follow these rules precisely:

1. TRANSCRIPTION
   - Copy every word on the page exactly as printed, in reading order
   - Do not summarise, interpret, correct or add anything

2. HIERARCHY
   - Express the structure of the text with leading dashes
   - A line with no dash is a top-level title; each extra dash is one level deeper
   - Section headings sit one level above the lines that belong to them
   - Separate lines with "\n"

3. OUTPUT FORMAT
   Return ONE JSON object and nothing else:
   {
     "header":  "<running page header, omit or null if absent>",
     "content": "<main page text with dash hierarchy>",
     "footer":  "<running page footer, omit or null if absent>"
   }

Example answer:
{"header": "Confidential Medical Records", "content": "Patient Visit Summary\n- Chief Complaint\n-- Persistent dry cough\n-- Duration: 2 weeks\n- Plan\n-- Chest X-ray", "footer": "Page 1 of 2"}"#;

/// User text accompanying the page image.
pub fn extraction_user_message(page_number: usize) -> String {
    format!("Transcribe page {page_number} from the attached image.")
}

/// Cross-page reconciliation into one markdown document.
pub const COMBINE_SYSTEM_PROMPT: &str = r#"You assemble per-page transcriptions of one clinic document into a single markdown document.

You receive a JSON array of page objects with the fields "header" (optional), "content" (dash hierarchy), "footer" (optional) and "page_number", already in page order.

Follow these rules precisely:

1. ORDER
   - Keep the pages and the text inside them in the order given

2. PAGE MARKERS
   - Begin every page's text with its marker on its own line:
     <!-- BEGIN PAGE: p. N -->
     where N is that page's "page_number"

3. MARKDOWN
   - Turn dash levels into markdown: top-level titles become #, sections ##, subsections ###, leaf lines become "-" list items
   - A page "header" is a top-level heading the first time it appears; repeated identical headers and footers may be dropped
   - Where a section continues from the previous page, keep its heading level consistent

4. VERBATIM TEXT
   - Never add, remove, reword or correct any text; only change indentation, heading marks and list marks

5. OUTPUT FORMAT
   Return ONE JSON object and nothing else:
   {"markdown": "<the combined markdown>"}"#;

/// Instruction preceding the serialised page array.
pub const COMBINE_USER_MESSAGE: &str =
    "Combine the following page transcriptions into one markdown document:";

/// Date, diagnosis, citation and lookup query from a combined document.
pub const METADATA_SYSTEM_PROMPT: &str = r#"You read clinic visit notes in markdown and pull out the facts needed for an injury summary.

The notes contain page markers of the form <!-- BEGIN PAGE: p. N -->; text belongs to the page of the nearest marker above it.

Extract:
1. "date_of_visit" — the date the patient was seen, always written as YYYY-MM-DD
2. "diagnosis" — the diagnosis, copied character for character
3. "reference" — "<document name> - p. N", using the document name you are given and the page N where the diagnosis text appears
4. "query" — a web search query for the diagnosis code. It MUST contain the words "ICD-10 code" and the diagnosis exactly as copied above, with nothing removed or rephrased

Return ONE JSON object and nothing else:
{"date_of_visit": "2023-04-05", "diagnosis": "Patient presents with acute bronchitis.", "reference": "Visit_Notes - p. 1", "query": "ICD-10 code for Patient presents with acute bronchitis."}"#;

/// User message for metadata extraction.
pub fn metadata_user_message(document_name: &str, markdown: &str) -> String {
    format!("Document name: {document_name}\n\nNotes:\n\n{markdown}")
}

/// Code selection over filtered search results.
pub const CODE_SYSTEM_PROMPT: &str = r#"You pick the ICD-10 code for a diagnosis out of web search results.

You receive the search query and a JSON object with an optional "answer_box" and a list of "organic_results".

Follow these rules precisely:

1. PRIORITY
   - If an "answer_box" is present and holds a code for the diagnosis, use it
   - Otherwise read "organic_results" in ascending "position" order and prefer the earliest match

2. WHAT COUNTS AS A CODE
   - One letter followed by two or more digits, optionally "." and more digits (e.g. M54.2, J20.9)
   - It must clearly belong to the diagnosis in the query, judged from "title" and "snippet"

3. NO GUESSING
   - Use only the given results; if no code qualifies, return an empty string

Return ONE JSON object and nothing else:
{"code": "M54.2"}"#;

/// User message for code selection.
pub fn code_user_message(query: &str, results_json: &str) -> String {
    format!("Query: {query}\n\nSearch results:\n{results_json}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_marker_format() {
        assert_eq!(page_marker(3), "<!-- BEGIN PAGE: p. 3 -->");
        assert!(page_marker(12).starts_with(PAGE_MARKER_PREFIX));
    }

    #[test]
    fn combine_prompt_documents_marker() {
        assert!(COMBINE_SYSTEM_PROMPT.contains("<!-- BEGIN PAGE: p. N -->"));
    }

    #[test]
    fn metadata_prompt_requires_trigger_phrase() {
        assert!(METADATA_SYSTEM_PROMPT.contains(QUERY_TRIGGER));
    }

    #[test]
    fn prompts_demand_json() {
        for prompt in [
            EXTRACTION_SYSTEM_PROMPT,
            COMBINE_SYSTEM_PROMPT,
            METADATA_SYSTEM_PROMPT,
            CODE_SYSTEM_PROMPT,
        ] {
            assert!(prompt.contains("ONE JSON object"));
        }
    }

    #[test]
    fn metadata_message_carries_document_name() {
        let msg = metadata_user_message("Visit_2023", "# Notes");
        assert!(msg.starts_with("Document name: Visit_2023"));
        assert!(msg.ends_with("# Notes"));
    }
}
