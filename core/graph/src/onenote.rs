//! OneNote notebooks, sections and pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, Instrument, Span};

use integrator_common::{Error, Result};

use crate::client::{Collection, GraphClient};
use crate::tree::{Classified, Listing, TreeSource};

const ID_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'/').add(b'?').add(b'#').add(b'%');

/// Reference of the notebook listing.
pub const NOTEBOOKS: &str = "notebooks";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sections_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pages_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_url: Option<String>,
}

/// Classify a raw OneNote item.
///
/// Sections carry `pagesUrl`, notebooks carry `sectionsUrl`; everything else
/// is a page named by its title.
pub fn classify_onenote_item(raw: &Value) -> Option<Classified> {
    let id = raw.get("id")?.as_str()?.to_string();
    let display_name = || {
        raw.get("displayName")
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    if raw.get("pagesUrl").is_some() {
        Some(Classified::Container {
            name: display_name()?,
            children_ref: NotebookTreeSource::section_ref(&id),
            id,
        })
    } else if raw.get("sectionsUrl").is_some() {
        Some(Classified::Container {
            name: display_name()?,
            children_ref: NotebookTreeSource::notebook_ref(&id),
            id,
        })
    } else {
        let name = raw
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(display_name)?;
        Some(Classified::Leaf { name, id })
    }
}

/// OneNote client scoped to the signed-in user.
#[derive(Debug, Clone)]
pub struct OneNote {
    client: GraphClient,
    span: Span,
}

impl OneNote {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            span: tracing::info_span!("onenote"),
        }
    }

    pub async fn list_notebooks(&self, token: &str) -> Result<Vec<Notebook>> {
        let page: Collection<Notebook> = self.get(token, NOTEBOOKS).await?;
        Ok(page.value)
    }

    /// Notebook with exactly `name` as display name.
    pub async fn find_notebook_by_name(&self, token: &str, name: &str) -> Result<Option<Notebook>> {
        let found = self
            .list_notebooks(token)
            .await?
            .into_iter()
            .find(|n| n.display_name == name);
        Ok(found)
    }

    pub async fn list_sections(&self, token: &str, notebook_id: &str) -> Result<Vec<Section>> {
        let path = NotebookTreeSource::notebook_ref(notebook_id);
        let page: Collection<Section> = self.get(token, &path).await?;
        Ok(page.value)
    }

    pub async fn list_pages(&self, token: &str, section_id: &str) -> Result<Vec<Page>> {
        let path = NotebookTreeSource::section_ref(section_id);
        let page: Collection<Page> = self.get(token, &path).await?;
        Ok(page.value)
    }

    pub async fn get_page(&self, token: &str, page_id: &str) -> Result<Page> {
        self.get(token, &format!("pages/{}", encode_id(page_id))).await
    }

    /// Page body as HTML.
    pub async fn get_page_content(&self, token: &str, page_id: &str) -> Result<String> {
        let path = onenote_path(&format!("pages/{}/content", encode_id(page_id)));
        self.client
            .get_text(token, &path)
            .instrument(self.span.clone())
            .await
    }

    pub async fn create_section(&self, token: &str, notebook_id: &str, name: &str) -> Result<Section> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Section name cannot be empty".to_string()));
        }

        let path = onenote_path(&format!("notebooks/{}/sections", encode_id(notebook_id)));
        let section: Section = self
            .client
            .post_json(token, &path, &json!({ "displayName": name }))
            .instrument(self.span.clone())
            .await?;

        info!(
            parent: &self.span,
            operation = "create_section",
            subject = %name,
            "Created section with id {}",
            section.id
        );
        Ok(section)
    }

    /// Create a page in `section_id` from an HTML body fragment.
    pub async fn create_page(
        &self,
        token: &str,
        section_id: &str,
        title: &str,
        body_html: &str,
    ) -> Result<Page> {
        let path = onenote_path(&format!("sections/{}/pages", encode_id(section_id)));
        let document = page_document(title, body_html);

        let page: Page = self
            .client
            .post_raw(token, &path, "application/xhtml+xml", document.into_bytes())
            .instrument(self.span.clone())
            .await?;

        info!(
            parent: &self.span,
            operation = "create_page",
            subject = %title,
            "Created page with id {}",
            page.id
        );
        Ok(page)
    }

    /// Append an HTML fragment to the end of a page body.
    pub async fn append_to_page(&self, token: &str, page_id: &str, html: &str) -> Result<()> {
        let path = onenote_path(&format!("pages/{}/content", encode_id(page_id)));
        let patch = json!([{
            "target": "body",
            "action": "append",
            "content": html,
        }]);

        self.client
            .patch_json(token, &path, &patch)
            .instrument(self.span.clone())
            .await?;

        info!(parent: &self.span, operation = "append_to_page", subject = %page_id, "Appended content");
        Ok(())
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, token: &str, path: &str) -> Result<T> {
        self.client
            .get_json(token, &onenote_path(path))
            .instrument(self.span.clone())
            .await
    }
}

fn onenote_path(path: &str) -> String {
    format!("me/onenote/{}", path)
}

fn encode_id(id: &str) -> String {
    utf8_percent_encode(id, ID_SEGMENT).to_string()
}

/// Page creation document with an escaped title.
fn page_document(title: &str, body_html: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <title>{}</title>\n  </head>\n  <body>\n{}\n  </body>\n</html>\n",
        escape_html(title),
        body_html
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Walks notebooks, their sections and section pages.
///
/// References are paths under `me/onenote/`: `notebooks`,
/// `notebooks/{id}/sections` or `sections/{id}/pages`.
pub struct NotebookTreeSource {
    onenote: OneNote,
}

impl NotebookTreeSource {
    pub fn new(onenote: OneNote) -> Self {
        Self { onenote }
    }

    /// Start reference for walking a single notebook.
    pub fn notebook_ref(notebook_id: &str) -> String {
        format!("notebooks/{}/sections", encode_id(notebook_id))
    }

    /// Reference listing the pages of a section.
    pub fn section_ref(section_id: &str) -> String {
        format!("sections/{}/pages", encode_id(section_id))
    }
}

#[async_trait]
impl TreeSource for NotebookTreeSource {
    fn name(&self) -> &str {
        "onenote"
    }

    fn root_ref(&self) -> String {
        NOTEBOOKS.to_string()
    }

    async fn list(&self, token: &str, reference: &str) -> Result<Listing> {
        let page: Collection<Value> = self.onenote.get(token, reference).await?;
        Ok(Listing {
            items: page.value,
            next_link: page.next_link,
        })
    }

    fn classify(&self, raw: &Value) -> Option<Classified> {
        classify_onenote_item(raw)
    }
}
