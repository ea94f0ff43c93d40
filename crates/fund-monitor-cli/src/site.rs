//! Chromium-backed implementation of the browser capability.
//!
//! Everything specific to the catalog site's DOM lives in a [`SiteProfile`]
//! loaded from JSON: login form selectors, search form selectors and the
//! locators for each record field. The session turns the profile into small
//! JavaScript snippets and evaluates them in the page.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use fund_monitor::{
    BrowserSession, Credentials, ExtractionError, FieldName, Record, SearchCriteria,
    SessionError, SessionFactory,
};

use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{NavigationTimeout, RenderContext, Renderer};

const BUNDLED_PROFILE: &str = include_str!("../profiles/fundsquare.json");

fn default_settle_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub login: LoginProfile,
    pub search: SearchProfile,
    pub record: RecordProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginProfile {
    pub url: String,
    /// Element to hover before the login form becomes visible.
    #[serde(default)]
    pub reveal_selector: Option<String>,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Text still present in the page after a rejected login.
    pub failure_marker: String,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProfile {
    pub url: String,
    /// `{category}` is replaced by the lower-cased provider category.
    pub service_provider_selector: String,
    pub isin_selector: String,
    pub legal_structure_selector: String,
    pub submit_selector: String,
    pub result_link_selector: String,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProfile {
    /// Text present on a fund page only when the session has expired.
    pub logged_out_marker: String,
    /// Values containing this text (case-insensitive) are stored as `-`.
    #[serde(default)]
    pub unavailable_marker: Option<String>,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Locator per snapshot field key (`isin`, `auditor`, ...).
    pub fields: BTreeMap<String, FieldLocator>,
}

/// How to find one field on a fund page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldLocator {
    /// Two-column table row whose first cell equals `label` (case-insensitive).
    Label { label: String },
    /// XPath expression evaluated to a string.
    XPath { xpath: String },
}

impl SiteProfile {
    /// The profile shipped with the binary.
    pub fn bundled() -> anyhow::Result<Self> {
        Self::parse(BUNDLED_PROFILE).context("bundled site profile is invalid")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read site profile {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid site profile {}", path.display()))
    }

    /// `path` if given, the bundled profile otherwise.
    pub fn load_or_bundled(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::bundled(),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.record.fields.is_empty() {
            bail!("record.fields must list at least one field");
        }
        for key in self.record.fields.keys() {
            match FieldName::from_key(key) {
                None => bail!("unknown record field '{key}'"),
                Some(FieldName::PrimaryId | FieldName::ExtractionDate) => {
                    bail!("record field '{key}' is filled in by the pipeline")
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn login_script(&self, credentials: &Credentials) -> String {
        let cfg = json!({
            "reveal": self.login.reveal_selector,
            "username": self.login.username_selector,
            "password": self.login.password_selector,
            "submit": self.login.submit_selector,
            "username_value": credentials.username,
            "password_value": credentials.password,
        });
        format!(
            r#"(() => {{
  const cfg = {cfg};
  if (cfg.reveal) {{
    const target = document.querySelector(cfg.reveal);
    if (target) target.dispatchEvent(new MouseEvent('mouseover', {{ bubbles: true }}));
  }}
  const user = document.querySelector(cfg.username);
  const pass = document.querySelector(cfg.password);
  const submit = document.querySelector(cfg.submit);
  if (!user || !pass || !submit) return 'login form not found';
  const set = (el, v) => {{
    el.focus();
    el.value = v;
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  }};
  set(user, cfg.username_value);
  set(pass, cfg.password_value);
  submit.click();
  return '';
}})()"#
        )
    }

    fn search_script(&self, criteria: &SearchCriteria) -> String {
        let (selector, mode, value) = match criteria {
            SearchCriteria::ServiceProvider {
                category, value, ..
            } => (
                self.search
                    .service_provider_selector
                    .replace("{category}", &category.to_lowercase()),
                "select_value",
                value.clone(),
            ),
            SearchCriteria::IsinPrefix { pattern } => {
                (self.search.isin_selector.clone(), "type", pattern.clone())
            }
            SearchCriteria::LegalStructure { label } => (
                self.search.legal_structure_selector.clone(),
                "select_text",
                label.clone(),
            ),
        };
        let cfg = json!({
            "selector": selector,
            "mode": mode,
            "value": value,
            "submit": self.search.submit_selector,
        });
        format!(
            r#"(() => {{
  const cfg = {cfg};
  const el = document.querySelector(cfg.selector);
  if (!el) return 'search field not found: ' + cfg.selector;
  if (cfg.mode === 'select_text') {{
    const opt = Array.from(el.options || []).find(o => o.text.trim() === cfg.value);
    if (!opt) return 'option not found: ' + cfg.value;
    el.value = opt.value;
  }} else {{
    el.value = cfg.value;
  }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  const submit = document.querySelector(cfg.submit);
  if (!submit) return 'search button not found';
  submit.click();
  return '';
}})()"#
        )
    }

    fn results_script(&self) -> String {
        let selector = json!(self.search.result_link_selector);
        format!(
            "Array.from(document.querySelectorAll({selector})).map(a => a.href).filter(h => !!h)"
        )
    }

    fn extract_script(&self) -> String {
        let cfg = json!({
            "fields": self.record.fields,
            "unavailable": self.record.unavailable_marker.as_ref().map(|m| m.to_lowercase()),
        });
        format!(
            r#"(() => {{
  const cfg = {cfg};
  const clean = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const byLabel = (label) => {{
    const want = label.toLowerCase();
    for (const tr of document.querySelectorAll('tr')) {{
      const tds = tr.querySelectorAll('td');
      if (tds.length >= 2 && clean(tds[0].textContent).toLowerCase() === want) {{
        const div = tds[1].querySelector('div');
        return clean((div || tds[1]).textContent);
      }}
    }}
    return null;
  }};
  const byXPath = (xp) => {{
    const r = document.evaluate(xp, document, null, XPathResult.STRING_TYPE, null);
    const v = clean(r.stringValue);
    return v === '' ? null : v;
  }};
  const out = {{}};
  for (const [key, loc] of Object.entries(cfg.fields)) {{
    let v = loc.xpath ? byXPath(loc.xpath) : byLabel(loc.label);
    if (v === null) v = '-';
    if (cfg.unavailable && v.toLowerCase().includes(cfg.unavailable)) v = '-';
    out[key] = v;
  }}
  return out;
}})()"#
        )
    }
}

/// Build a record from extracted `field key -> value` pairs.
/// Returns `None` when no field carried a value.
pub fn record_from_fields(identifier: &str, fields: &HashMap<String, String>) -> Option<Record> {
    let mut record = Record::new(identifier);
    let mut any = false;
    for (key, value) in fields {
        let Some(field) = FieldName::from_key(key) else {
            continue;
        };
        if matches!(field, FieldName::PrimaryId | FieldName::ExtractionDate) {
            continue;
        }
        any |= fund_monitor::has_value(value);
        *record.field_mut(field) = value.trim().to_string();
    }
    any.then_some(record)
}

/// One browser, one tab, one logged-in user.
pub struct ChromiumSession {
    renderer: Arc<ChromiumRenderer>,
    context: Option<Box<dyn RenderContext>>,
    profile: Arc<SiteProfile>,
    page_timeout: Duration,
}

impl ChromiumSession {
    pub async fn launch(profile: Arc<SiteProfile>, page_timeout: Duration) -> anyhow::Result<Self> {
        let renderer = Arc::new(ChromiumRenderer::new().await?);
        let context = renderer.new_context().await?;
        Ok(Self {
            renderer,
            context: Some(context),
            profile,
            page_timeout,
        })
    }

    fn context(&mut self) -> Result<&mut Box<dyn RenderContext>, SessionError> {
        self.context.as_mut().ok_or(SessionError::Closed)
    }

    async fn goto(&mut self, url: &str) -> Result<(), anyhow::Error> {
        let timeout_ms = self.page_timeout.as_millis() as u64;
        self.context()?.navigate(url, timeout_ms).await?;
        Ok(())
    }

    async fn eval(&mut self, script: &str) -> Result<serde_json::Value, SessionError> {
        self.context()?
            .execute_js(script)
            .await
            .map_err(|e| SessionError::Unavailable(format!("{e:#}")))
    }

    async fn page_contains(&mut self, marker: &str) -> Result<bool, SessionError> {
        let html = self
            .context()?
            .get_html()
            .await
            .map_err(|e| SessionError::Unavailable(format!("{e:#}")))?;
        Ok(html.contains(marker))
    }
}

async fn settle(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn script_failure(value: &serde_json::Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(String::from)
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.goto(url).await.map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            reason: format!("{e:#}"),
        })
    }

    async fn submit_credentials(&mut self, credentials: &Credentials) -> Result<bool, SessionError> {
        let profile = Arc::clone(&self.profile);
        self.navigate(&profile.login.url).await?;
        settle(profile.login.settle_ms / 2).await;

        let outcome = self.eval(&profile.login_script(credentials)).await?;
        if let Some(reason) = script_failure(&outcome) {
            return Err(SessionError::Navigation {
                url: profile.login.url.clone(),
                reason,
            });
        }
        settle(profile.login.settle_ms).await;

        let rejected = self.page_contains(&profile.login.failure_marker).await?;
        Ok(!rejected)
    }

    async fn run_search(&mut self, criteria: &SearchCriteria) -> Result<Vec<String>, SessionError> {
        let profile = Arc::clone(&self.profile);
        self.navigate(&profile.search.url).await?;
        settle(profile.search.settle_ms / 2).await;

        let outcome = self.eval(&profile.search_script(criteria)).await?;
        if let Some(reason) = script_failure(&outcome) {
            return Err(SessionError::Search(reason));
        }
        settle(profile.search.settle_ms).await;

        let links = self.eval(&profile.results_script()).await?;
        let links: Vec<String> = serde_json::from_value(links)
            .map_err(|e| SessionError::Search(format!("unexpected result list: {e}")))?;
        let mut seen = std::collections::HashSet::new();
        Ok(links.into_iter().filter(|l| seen.insert(l.clone())).collect())
    }

    async fn extract_record(&mut self, identifier: &str) -> Result<Record, ExtractionError> {
        let profile = Arc::clone(&self.profile);
        if let Err(e) = self.goto(identifier).await {
            if e.downcast_ref::<NavigationTimeout>().is_some() {
                return Err(ExtractionError::Timeout(identifier.to_string()));
            }
            return Err(ExtractionError::PageLoad {
                identifier: identifier.to_string(),
                reason: format!("{e:#}"),
            });
        }
        settle(profile.record.settle_ms).await;

        if self.page_contains(&profile.record.logged_out_marker).await? {
            return Err(ExtractionError::PageLoad {
                identifier: identifier.to_string(),
                reason: "session logged out".to_string(),
            });
        }

        let value = self.eval(&profile.extract_script()).await?;
        let fields: HashMap<String, String> =
            serde_json::from_value(value).map_err(|e| ExtractionError::PageLoad {
                identifier: identifier.to_string(),
                reason: format!("unexpected extraction result: {e}"),
            })?;
        record_from_fields(identifier, &fields)
            .ok_or_else(|| ExtractionError::NotFound(identifier.to_string()))
    }

    async fn close(mut self: Box<Self>) -> Result<(), SessionError> {
        if let Some(context) = self.context.take() {
            let _ = context.close().await;
        }
        self.renderer
            .shutdown()
            .await
            .map_err(|e| SessionError::Unavailable(format!("{e:#}")))
    }
}

/// Launches one isolated browser per session.
pub struct ChromiumSessionFactory {
    profile: Arc<SiteProfile>,
    page_timeout: Duration,
}

impl ChromiumSessionFactory {
    pub fn new(profile: SiteProfile, page_timeout: Duration) -> Self {
        Self {
            profile: Arc::new(profile),
            page_timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, SessionError> {
        let session = ChromiumSession::launch(Arc::clone(&self.profile), self.page_timeout)
            .await
            .map_err(|e| SessionError::Unavailable(format!("{e:#}")))?;
        tracing::debug!("Opened browser session for profile {}", self.profile.name);
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_profile_is_valid() {
        let profile = SiteProfile::bundled().unwrap();
        assert_eq!(profile.login.failure_marker, "loginheader");
        assert_eq!(
            profile.record.fields.get("auditor"),
            Some(&FieldLocator::Label {
                label: "auditor".into()
            })
        );
        assert!(matches!(
            profile.record.fields.get("isin"),
            Some(FieldLocator::XPath { .. })
        ));
    }

    #[test]
    fn test_unknown_field_key_is_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(BUNDLED_PROFILE).unwrap();
        value["record"]["fields"]["favourite_colour"] = json!({ "label": "colour" });
        let err = SiteProfile::parse(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("favourite_colour"));

        let mut value: serde_json::Value = serde_json::from_str(BUNDLED_PROFILE).unwrap();
        value["record"]["fields"]["url"] = json!({ "xpath": "//a" });
        assert!(SiteProfile::parse(&value.to_string()).is_err());
    }

    #[test]
    fn test_login_script_escapes_credentials() {
        let profile = SiteProfile::bundled().unwrap();
        let script = profile.login_script(&Credentials::new("ana", "p'a\"ss</script>"));
        assert!(script.contains(r#""password_value":"p'a\"ss</script>""#));
        assert!(script.starts_with("(() => {"));
    }

    #[test]
    fn test_search_script_uses_lowercase_category() {
        let profile = SiteProfile::bundled().unwrap();
        let script = profile.search_script(&SearchCriteria::ServiceProvider {
            category: "Auditor".into(),
            value: "42".into(),
            label: "Audit Co".into(),
        });
        assert!(script.contains("select[name='auditor']"));
        assert!(script.contains("\"mode\":\"select_value\""));

        let script = profile.search_script(&SearchCriteria::LegalStructure {
            label: "SICAV".into(),
        });
        assert!(script.contains("\"mode\":\"select_text\""));
    }

    #[test]
    fn test_record_from_fields() {
        let fields: HashMap<String, String> = [
            ("isin", "LU0000000001"),
            ("fund_name", "Fund A"),
            ("auditor", " Audit Co "),
            ("url", "ignored"),
            ("bogus", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let record = record_from_fields("https://fs.test/1", &fields).unwrap();
        assert_eq!(record.primary_id, "https://fs.test/1");
        assert_eq!(record.secondary_id, "LU0000000001");
        assert_eq!(record.auditor, "Audit Co");

        let empty: HashMap<String, String> =
            [("auditor".to_string(), "-".to_string())].into_iter().collect();
        assert!(record_from_fields("https://fs.test/2", &empty).is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_factory_opens_and_closes_session() {
        let factory = ChromiumSessionFactory::new(
            SiteProfile::bundled().unwrap(),
            Duration::from_secs(10),
        );
        let mut session = factory.open().await.expect("failed to open session");
        session
            .navigate("data:text/html,<table><tr><td>Auditor</td><td>X</td></tr></table>")
            .await
            .expect("navigation failed");
        session.close().await.expect("close failed");
    }
}
