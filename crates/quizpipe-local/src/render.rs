//! Browser rendering via a Playwright (Node.js) shellout.
//!
//! The heuristics downstream only consume a [`PageSnapshot`]; this module is
//! the one place that knows how a page becomes HTML + visible text. The Node
//! script is kept small and stdout is JSON-only so failures stay
//! machine-readable.

use quizpipe_core::{Error, PageSnapshot, RenderBackend, RenderRequest, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn env_truthy(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn node_path_candidates() -> Vec<String> {
    // Best-effort Node global module roots across common setups. An explicit
    // override is available via QUIZPIPE_NODE_PATH or NODE_PATH.
    let mut out: Vec<String> = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn detect_node_path_for_playwright() -> Option<String> {
    fn has_playwright(np: &str) -> bool {
        np.split(':')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .any(|p| std::path::PathBuf::from(p).join("playwright").is_dir())
    }

    if let Ok(v) = std::env::var("QUIZPIPE_NODE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let existing = std::env::var("NODE_PATH").unwrap_or_default();
    if has_playwright(&existing) {
        return None;
    }

    let npm_root = || -> Option<String> {
        let out = std::process::Command::new("npm")
            .args(["root", "-g"])
            .output()
            .ok()?;
        if !out.status.success() {
            return None;
        }
        let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (!s.is_empty() && std::path::PathBuf::from(&s).join("playwright").is_dir()).then_some(s)
    };

    let found = npm_root().or_else(|| {
        node_path_candidates()
            .into_iter()
            .find(|root| std::path::PathBuf::from(root).join("playwright").is_dir())
    })?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

// Stdout must stay JSON-only; all diagnostics travel in the error object.
const JS: &str = r#"
const fs = require('fs');

function ok(obj) { process.stdout.write(JSON.stringify(obj)); }
function bad(code, message) { ok({ ok: false, error: { code, message } }); }

async function main() {
  let arg = '';
  try { arg = fs.readFileSync(0, 'utf8'); } catch (_) {}
  let req;
  try { req = JSON.parse(arg); } catch (e) { return bad('invalid_params', 'bad JSON args'); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return bad('not_configured',
      'Playwright is not installed for Node.js: npm i -g playwright && npx playwright install chromium');
  }

  const url = String(req.url || '').trim();
  if (!url) return bad('invalid_params', 'url must be non-empty');
  const timeoutMs = Number(req.timeout_ms || 120000);

  const t0 = Date.now();
  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true, args: ['--no-sandbox'] });
    const context = await browser.newContext();
    const page = await context.newPage();
    page.setDefaultTimeout(timeoutMs);

    const resp = await page.goto(url, { waitUntil: 'networkidle', timeout: timeoutMs });

    const html = await page.content();
    let text = '';
    try { text = await page.innerText('body'); } catch (_) {}
    ok({
      ok: true,
      final_url: page.url(),
      status: resp ? resp.status() : null,
      html,
      text,
      elapsed_ms: Date.now() - t0,
    });
  } catch (e) {
    const name = e && e.name ? String(e.name) : '';
    const code = name === 'TimeoutError' ? 'timeout' : 'render_failed';
    bad(code, String(e && e.message ? e.message : e));
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => bad('render_failed', String(e && e.message ? e.message : e)));
"#;

/// Navigate to `url`, wait for network-idle, and capture one snapshot.
pub async fn render_page(url: &str, timeout_ms: u64) -> Result<PageSnapshot> {
    // Deterministic escape hatch (tests and "no local tooling" environments).
    if env_truthy("QUIZPIPE_RENDER_DISABLE") {
        return Err(Error::NotConfigured(
            "render backend disabled (QUIZPIPE_RENDER_DISABLE)".to_string(),
        ));
    }

    let args_json = serde_json::json!({ "url": url, "timeout_ms": timeout_ms }).to_string();

    // Hard wall-clock timeout for the whole Node+Playwright operation;
    // checking elapsed after completion would not prevent hangs.
    let hard_timeout_ms = timeout_ms.saturating_add(10_000);

    let node_bin = std::env::var("QUIZPIPE_NODE").unwrap_or_else(|_| "node".to_string());
    let mut cmd = tokio::process::Command::new(node_bin);
    if let Some(node_path) = detect_node_path_for_playwright() {
        cmd.env("NODE_PATH", node_path);
    }
    let mut child = cmd
        .arg("-e")
        .arg(JS)
        .kill_on_drop(true)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::NotConfigured(format!(
                "page render requires Node.js (`node`) and the Playwright npm package: {e}"
            ))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(args_json.as_bytes()).await;
        // EOF so the script's readFileSync(0) completes deterministically.
        let _ = stdin.shutdown().await;
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Render("render child: missing stdout pipe".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Render("render child: missing stderr pipe".to_string()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
        buf
    });

    match tokio::time::timeout(Duration::from_millis(hard_timeout_ms), child.wait()).await {
        Ok(r) => {
            r.map_err(|e| Error::Render(format!("render child wait failed: {e}")))?;
        }
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(Error::RenderTimeout(format!(
                "browser render exceeded hard timeout of {hard_timeout_ms}ms"
            )));
        }
    }

    let out_stdout = stdout_task.await.unwrap_or_default();
    let out_stderr = stderr_task.await.unwrap_or_default();

    let stdout_s = String::from_utf8_lossy(&out_stdout).trim().to_string();
    let v: serde_json::Value = serde_json::from_str(&stdout_s).map_err(|e| {
        let stderr_s = String::from_utf8_lossy(&out_stderr).trim().to_string();
        if stderr_s.is_empty() {
            Error::Render(format!("render child returned invalid JSON: {e}"))
        } else {
            Error::Render(format!(
                "render child returned invalid JSON: {e}. stderr: {stderr_s}"
            ))
        }
    })?;

    if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
        let code = v
            .pointer("/error/code")
            .and_then(|x| x.as_str())
            .unwrap_or("render_failed");
        let message = v
            .pointer("/error/message")
            .and_then(|x| x.as_str())
            .unwrap_or("browser render failed")
            .to_string();
        return Err(match code {
            "timeout" => Error::RenderTimeout(message),
            "not_configured" => Error::NotConfigured(message),
            "invalid_params" => Error::InvalidUrl(message),
            _ => Error::Render(message),
        });
    }

    let final_url = v
        .get("final_url")
        .and_then(|x| x.as_str())
        .unwrap_or(url)
        .to_string();
    let status = v.get("status").and_then(|x| x.as_u64()).map(|n| n as u16);
    let html = v
        .get("html")
        .and_then(|x| x.as_str())
        .unwrap_or("")
        .to_string();
    let mut text = v
        .get("text")
        .and_then(|x| x.as_str())
        .unwrap_or("")
        .to_string();
    let elapsed_ms = v.get("elapsed_ms").and_then(|x| x.as_u64()).unwrap_or(0);

    if html.trim().is_empty() {
        return Err(Error::Render("browser render returned empty HTML".to_string()));
    }
    if text.trim().is_empty() {
        // Some pages defeat innerText (frames, shadow roots); derive visible
        // text from the HTML snapshot instead of giving the stages nothing.
        text = html2text::from_read(std::io::Cursor::new(html.as_bytes()), 80)
            .unwrap_or_default();
    }

    Ok(PageSnapshot {
        final_url,
        status,
        html,
        text,
        elapsed_ms,
    })
}

/// [`RenderBackend`] over the Playwright shellout.
#[derive(Debug, Clone, Default)]
pub struct PlaywrightRenderer;

#[async_trait::async_trait]
impl RenderBackend for PlaywrightRenderer {
    async fn render(&self, req: &RenderRequest) -> Result<PageSnapshot> {
        render_page(&req.url, req.timeout_ms).await
    }
}
