//! The answer-inference pipeline.
//!
//! One run = one rendered page driven through an ordered heuristic chain:
//! decoded-payload inspection → linked-asset extraction → DOM-table
//! extraction → free-text inference. Stages share a single answer slot and a
//! stage only executes while the slot is still empty; the first non-absent
//! candidate wins. A structured trace accumulates regardless of outcome.

use crate::submit::SubmitClient;
use crate::{excerpt, locator, payload, table, tabular};
use quizpipe_core::{
    Answer, AssetKind, Error, FetchBackend, FetchRequest, FetchResponse, PageSnapshot,
    RenderBackend, RenderRequest, Result, RunResult, RunStatus, RunTrace, Task,
};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SolverCfg {
    /// Browser navigation timeout.
    pub nav_timeout_ms: u64,
    /// Per-asset download timeout.
    pub asset_timeout_ms: u64,
    /// Submission POST timeout.
    pub submit_timeout_ms: u64,
    /// Hard wall-clock cap on the whole run, enforced as a cancellation
    /// wrapper (the per-operation timeouts alone would allow longer runs).
    pub run_deadline_ms: u64,
    /// Byte cap per downloaded asset.
    pub max_asset_bytes: u64,
}

impl Default for SolverCfg {
    fn default() -> Self {
        Self {
            nav_timeout_ms: 120_000,
            asset_timeout_ms: 60_000,
            submit_timeout_ms: 60_000,
            run_deadline_ms: 160_000,
            max_asset_bytes: 50_000_000,
        }
    }
}

pub struct Solver {
    fetcher: Arc<dyn FetchBackend>,
    renderer: Arc<dyn RenderBackend>,
    submit: SubmitClient,
    cfg: SolverCfg,
}

impl Solver {
    pub fn new(
        fetcher: Arc<dyn FetchBackend>,
        renderer: Arc<dyn RenderBackend>,
        cfg: SolverCfg,
    ) -> Result<Self> {
        let submit = SubmitClient::new(cfg.submit_timeout_ms)?;
        Ok(Self {
            fetcher,
            renderer,
            submit,
            cfg,
        })
    }

    /// Drive one task end to end. Never panics outward; every failure mode
    /// maps to a terminal [`RunStatus`].
    pub async fn run(&self, task: &Task) -> RunResult {
        let mut trace = RunTrace::default();
        let deadline = Duration::from_millis(self.cfg.run_deadline_ms);
        let outcome = tokio::time::timeout(deadline, self.run_inner(task, &mut trace)).await;
        let result = match outcome {
            Ok(Ok((status, submit_code))) => RunResult {
                status,
                submit_code,
                trace,
            },
            Ok(Err(Error::RenderTimeout(e))) => {
                trace.note("error", e);
                RunResult::terminal(RunStatus::PlaywrightTimeout, trace)
            }
            Ok(Err(e)) => {
                trace.note("error", e.to_string());
                RunResult::terminal(RunStatus::Error, trace)
            }
            Err(_) => {
                trace.note(
                    "error",
                    format!("run deadline of {}ms exceeded", self.cfg.run_deadline_ms),
                );
                RunResult::terminal(RunStatus::Error, trace)
            }
        };
        tracing::info!(email = %task.email, status = ?result.status, "solver finished");
        result
    }

    async fn run_inner(
        &self,
        task: &Task,
        trace: &mut RunTrace,
    ) -> Result<(RunStatus, Option<u16>)> {
        tracing::info!(email = %task.email, url = %task.url, "solver starting");
        let snap = self
            .renderer
            .render(&RenderRequest {
                url: task.url.clone(),
                timeout_ms: self.cfg.nav_timeout_ms,
            })
            .await?;
        trace.step("page_loaded");

        // Exactly one submit-target lookup per run.
        let submit_target = locator::find_submit_target(&snap.html, &snap.text);
        if let Some(t) = &submit_target {
            trace.note("submit_url", t.clone());
        }

        let mut answer = self.decoded_payload_stage(&snap, trace).await;
        if answer.is_none() {
            answer = self.linked_asset_stage(&snap, trace).await;
        }
        if answer.is_none() {
            answer = Self::dom_table_stage(&snap, trace);
        }
        if answer.is_none() {
            answer = self.free_text_stage(&snap, trace).await;
        }

        if let Some(a) = &answer {
            trace.note(
                "attempted_answer",
                serde_json::to_value(a).unwrap_or(serde_json::Value::Null),
            );
        }

        match (answer, submit_target) {
            (Some(answer), Some(target)) => {
                match self.submit.submit(&target, task, &answer, trace).await {
                    Ok(code) => Ok((RunStatus::Submitted, Some(code))),
                    Err(e) => {
                        // The computed answer stays in the trace; submission
                        // is never retried.
                        tracing::warn!(error = %e, "submission failed");
                        trace.note("submit_error", e.to_string());
                        Ok((RunStatus::SubmitFailed, None))
                    }
                }
            }
            (Some(_), None) => Ok((RunStatus::NoSubmitUrl, None)),
            (None, Some(_)) => Ok((RunStatus::NoAnswer, None)),
            (None, None) => Ok((RunStatus::NoAction, None)),
        }
    }

    /// Stage 1: inline base64 payloads. A direct `answer` field ends the
    /// whole pipeline; a `url` field or raw URLs dispatch into the tabular
    /// extractor.
    async fn decoded_payload_stage(
        &self,
        snap: &PageSnapshot,
        trace: &mut RunTrace,
    ) -> Option<Answer> {
        let b64 = payload::find_encoded_payload(&snap.html)?;
        let decoded = payload::decode_base64_text(&b64)?;
        trace.step("decoded_atob");
        trace.note("atob_decoded", excerpt(&decoded, 2000));

        if let Some(v) = payload::parse_json_lenient(&decoded) {
            trace.step("found_json_in_decoded");
            if let Some(ans) = v
                .get("answer")
                .filter(|a| !a.is_null())
                .and_then(Answer::from_json)
            {
                trace.note("answer_source", "decoded_answer");
                return Some(ans);
            }
            if let Some(u) = v.get("url").and_then(|x| x.as_str()) {
                trace.note("decoded_asset_url", u.to_string());
                return self.asset_answer(u, &[2], trace).await;
            }
        }

        for u in payload::find_raw_urls(&decoded) {
            if let Some(a) = self.asset_answer(&u, &[2], trace).await {
                return Some(a);
            }
        }
        None
    }

    /// Stage 2: the first `.pdf` (checked first) or `.csv` anchor on the
    /// page; PDF extraction defaults to page 2 absent a better hint.
    async fn linked_asset_stage(
        &self,
        snap: &PageSnapshot,
        trace: &mut RunTrace,
    ) -> Option<Answer> {
        let links = page_links(&snap.html, &snap.final_url);
        let asset = links
            .iter()
            .find(|l| AssetKind::from_url(l) == AssetKind::Pdf)
            .or_else(|| links.iter().find(|l| AssetKind::from_url(l) == AssetKind::Csv))?
            .clone();
        trace.step("found_assets");
        trace.note("asset_url", asset.clone());
        self.asset_answer(&asset, &[2], trace).await
    }

    /// Stage 3: the first DOM table, via the shared column-selection rule.
    fn dom_table_stage(snap: &PageSnapshot, trace: &mut RunTrace) -> Option<Answer> {
        let (headers, rows) = table::first_table_columns(&snap.html)?;
        trace.step("dom_table_detected");
        let cs = tabular::sum_selected_column(&headers, &rows)?;
        trace.note("answer_source", format!("dom_table_sum:{}", cs.column));
        Some(Answer::Number(cs.sum))
    }

    /// Stage 4: free-text inference. A "sum of the <col> column … page N"
    /// instruction plus a PDF link beats the boolean fallback; the fallback
    /// itself is a fixed guess of `true`, kept as a last resort and flagged
    /// as low-confidence in the trace.
    async fn free_text_stage(&self, snap: &PageSnapshot, trace: &mut RunTrace) -> Option<Answer> {
        trace.step("text_inference");

        if let Some((col, page)) = parse_sum_instruction(&snap.text) {
            trace.note("inferred_col", col.clone());
            trace.note("inferred_page", page as u64);
            let links = page_links(&snap.html, &snap.final_url);
            let pdf = links
                .iter()
                .find(|l| AssetKind::from_url(l) == AssetKind::Pdf)?;
            let resp = self.fetch_asset(pdf, trace).await?;
            let text = tabular::pdf_page_text(&resp.bytes, &[page]).ok()?;
            let n = tabular::number_from_text(&text)?;
            trace.note("answer_source", format!("pdf_page{page}:{col}:approx"));
            return Some(Answer::Number(n));
        }

        let Ok(bool_re) = Regex::new(r"(?i)\btrue or false\b") else {
            return None;
        };
        if bool_re.is_match(&snap.text) {
            trace.step("true_false_fallback");
            trace.note("answer_source", "true_false_guess_low_confidence");
            return Some(Answer::Bool(true));
        }
        None
    }

    /// Fetch + extract one asset by URL suffix. PDF goes through the
    /// max-of-candidate-sums reduction; everything else (including unknown
    /// suffixes) is tried as CSV.
    async fn asset_answer(
        &self,
        url: &str,
        pdf_pages: &[usize],
        trace: &mut RunTrace,
    ) -> Option<Answer> {
        let resp = self.fetch_asset(url, trace).await?;
        match AssetKind::from_url(url) {
            AssetKind::Pdf => {
                let sum = tabular::pdf_sum(&resp.bytes, pdf_pages)?;
                trace.note("answer_source", "pdf_max_sum");
                Some(Answer::Number(sum))
            }
            AssetKind::Csv | AssetKind::Other => {
                let cs = tabular::csv_sum(&resp.bytes)?;
                trace.note("answer_source", format!("csv_sum:{}", cs.column));
                Some(Answer::Number(cs.sum))
            }
        }
    }

    async fn fetch_asset(&self, url: &str, trace: &mut RunTrace) -> Option<FetchResponse> {
        let req = FetchRequest {
            url: url.to_string(),
            timeout_ms: Some(self.cfg.asset_timeout_ms),
            max_bytes: Some(self.cfg.max_asset_bytes),
        };
        match self.fetcher.fetch(&req).await {
            Ok(resp) => {
                if let Some(name) = &resp.filename {
                    trace.note("downloaded", name.clone());
                }
                Some(resp)
            }
            Err(e) => {
                // Branch-local failure: the chain moves on to the next
                // heuristic instead of aborting the run.
                tracing::warn!(url, error = %e, "asset fetch failed");
                None
            }
        }
    }
}

/// "sum of the <col> column … page N" (case-insensitive, across line
/// breaks). Returns the quoted-or-bare column name and the 1-based page.
pub(crate) fn parse_sum_instruction(text: &str) -> Option<(String, usize)> {
    let re = Regex::new(
        r#"(?is)sum of the ["']?(?P<col>[A-Za-z0-9 _-]+)["']? column.*page\s*(?P<page>\d+)"#,
    )
    .ok()?;
    let c = re.captures(text)?;
    let col = c.name("col")?.as_str().trim().to_string();
    let page = c.name("page")?.as_str().parse::<usize>().ok()?;
    Some((col, page))
}

/// Absolute anchor hrefs in document order, deduped, resolved against the
/// final page URL. javascript:/mailto: pseudo-links are skipped.
fn page_links(html: &str, base_url: &str) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }
        let lc = href.to_ascii_lowercase();
        if lc.starts_with("javascript:") || lc.starts_with("mailto:") {
            continue;
        }
        let abs = if let Ok(u) = url::Url::parse(href) {
            u
        } else if let Some(b) = &base {
            match b.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            continue;
        };
        let s = abs.to_string();
        if seen.insert(s.clone()) {
            out.push(s);
        }
    }
    out
}
