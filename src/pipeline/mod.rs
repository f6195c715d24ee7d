//! Pipeline stages for turning one clinic-visit PDF into one injury record.
//!
//! Each submodule implements exactly one step, and every external
//! capability (rendering, inference, search) is reached through a trait so
//! stages can be tested against fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ render ─▶ aggregate(extract × N) ─▶ combine ─▶ metadata ─▶ code
//! (folder)  (pdfium)   (vision, bounded pool)   (LLM)      (LLM)      (search + LLM)
//! ```
//!
//! 1. [`input`]     — list the PDFs in the input folder
//! 2. [`render`]    — rasterise pages in `spawn_blocking`; [`encode`] wraps
//!    each image as base64 PNG
//! 3. [`extract`]   — one vision call per page → `PageContent`
//! 4. [`aggregate`] — run extraction under a semaphore, reassemble in page
//!    order, drop failed pages
//! 5. [`combine`]   — merge pages into markdown with page markers
//! 6. [`metadata`]  — date, diagnosis, reference, lookup query
//! 7. [`search`] + [`code`] — web search, then code selection
//!
//! [`llm`] holds the inference seam and the call wrapper shared by stages
//! 3, 5, 6 and 7; [`response`] turns raw model text into typed JSON.

pub mod aggregate;
pub mod code;
pub mod combine;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod metadata;
pub mod render;
pub mod response;
pub mod search;
