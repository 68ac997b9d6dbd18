//! OneDrive operations on the signed-in user's drive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn, Instrument, Span};

use integrator_common::{Error, Result};

use crate::client::{ByteStream, Collection, GraphClient};
use crate::tree::{Classified, Listing, TreeSource};

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Characters escaped inside a search expression.
const SEARCH: &AsciiSet = &SEGMENT.add(b'\'').add(b'(').add(b')').add(b'&').add(b'+');

/// Reference of the drive root.
pub const ROOT: &str = "root";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Package facet; OneNote notebooks are packages of type `oneNote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageFacet {
    #[serde(rename = "type")]
    pub package_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub drive_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Drive item metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub file: Option<FileFacet>,
    #[serde(default)]
    pub package: Option<PackageFacet>,
    #[serde(default)]
    pub parent_reference: Option<ItemReference>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_notebook(&self) -> bool {
        self.package
            .as_ref()
            .is_some_and(|p| p.package_type.eq_ignore_ascii_case("oneNote"))
    }
}

/// Classify a raw drive item: a `folder` facet makes it a container.
pub fn classify_drive_item(raw: &Value) -> Option<Classified> {
    let id = raw.get("id")?.as_str()?.to_string();
    let name = raw.get("name")?.as_str()?.to_string();

    if raw.get("folder").is_some_and(Value::is_object) {
        Some(Classified::Container {
            name,
            children_ref: id.clone(),
            id,
        })
    } else {
        Some(Classified::Leaf { name, id })
    }
}

/// Request path of an item; `root` addresses the drive root.
fn item_path(item_id: &str) -> String {
    if item_id == ROOT {
        "me/drive/root".to_string()
    } else {
        format!("me/drive/items/{}", utf8_percent_encode(item_id, SEGMENT))
    }
}

/// OneDrive client.
#[derive(Debug, Clone)]
pub struct OneDrive {
    client: GraphClient,
    span: Span,
}

impl OneDrive {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            span: tracing::info_span!("onedrive"),
        }
    }

    /// Create a folder at the drive root.
    ///
    /// Name conflicts are resolved by the service renaming the new folder.
    pub async fn create_folder(&self, token: &str, name: &str) -> Result<DriveItem> {
        self.create_folder_in(token, ROOT, name).await
    }

    /// Create a folder under `parent_id`.
    pub async fn create_folder_in(
        &self,
        token: &str,
        parent_id: &str,
        name: &str,
    ) -> Result<DriveItem> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Folder name cannot be empty".to_string()));
        }

        let body = json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });
        let path = format!("{}/children", item_path(parent_id));

        let item: DriveItem = self
            .client
            .post_json(token, &path, &body)
            .instrument(self.span.clone())
            .await?;

        info!(
            parent: &self.span,
            operation = "create_folder",
            subject = %item.name,
            "Created folder with id {}",
            item.id
        );
        Ok(item)
    }

    /// Item metadata by id.
    pub async fn get_item(&self, token: &str, item_id: &str) -> Result<DriveItem> {
        self.client
            .get_json(token, &item_path(item_id))
            .instrument(self.span.clone())
            .await
    }

    /// First page of children under `item_id`.
    pub async fn list_children(&self, token: &str, item_id: &str) -> Result<Collection<DriveItem>> {
        let path = format!("{}/children", item_path(item_id));
        self.client
            .get_json(token, &path)
            .instrument(self.span.clone())
            .await
    }

    /// Upload a small file into `folder_id`, replacing any file of that name.
    pub async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<DriveItem> {
        let size = data.len();
        let item: DriveItem = self
            .client
            .put_bytes(token, &content_path(folder_id, file_name), "application/octet-stream", data)
            .instrument(self.span.clone())
            .await?;

        info!(
            parent: &self.span,
            operation = "upload_file",
            subject = %file_name,
            "Uploaded {} bytes as item {}",
            size,
            item.id
        );
        Ok(item)
    }

    /// Upload a local file into `folder_id` under its own file name.
    pub async fn upload_path(&self, token: &str, folder_id: &str, source: &Path) -> Result<DriveItem> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", source.display())))?;
        let data = tokio::fs::read(source).await?;
        self.upload_file(token, folder_id, file_name, data).await
    }

    /// Stream the content of `file_name` inside `folder_id`.
    pub async fn download_file(&self, token: &str, folder_id: &str, file_name: &str) -> Result<ByteStream> {
        self.client
            .get_stream(token, &content_path(folder_id, file_name))
            .instrument(self.span.clone())
            .await
    }

    /// Download `file_name` into `dest_dir`, returning the written path.
    pub async fn download_to(
        &self,
        token: &str,
        folder_id: &str,
        file_name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let local_name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("Invalid file name: {}", file_name)))?;
        let dest = dest_dir.join(local_name);

        let stream = self.download_file(token, folder_id, file_name).await?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let written = save_stream(stream, &dest).await?;

        info!(
            parent: &self.span,
            operation = "download_file",
            subject = %file_name,
            "Downloaded {} bytes to {}",
            written,
            dest.display()
        );
        Ok(dest)
    }

    /// Delete an item by id.
    pub async fn delete_item(&self, token: &str, item_id: &str) -> Result<()> {
        self.client
            .delete(token, &item_path(item_id))
            .instrument(self.span.clone())
            .await?;

        info!(parent: &self.span, operation = "delete_item", subject = %item_id, "Deleted item");
        Ok(())
    }

    /// Delete the children of a folder, then the folder itself.
    ///
    /// A child that fails to delete is logged and skipped; a failure to list
    /// the folder aborts before anything is deleted.
    pub async fn delete_folder_and_contents(&self, token: &str, folder_id: &str) -> Result<()> {
        let children = self.list_children(token, folder_id).await?;

        for child in &children.value {
            if let Err(e) = self.delete_item(token, &child.id).await {
                warn!(
                    parent: &self.span,
                    operation = "delete_item",
                    subject = %child.name,
                    "Failed to delete child: {}",
                    e
                );
            }
        }

        self.delete_item(token, folder_id).await
    }

    /// Find a OneNote notebook package in the drive by exact name.
    pub async fn find_notebook(&self, token: &str, name: &str) -> Result<Option<DriveItem>> {
        let query = name.replace('\'', "''");
        let path = format!(
            "me/drive/root/search(q='{}')",
            utf8_percent_encode(&query, SEARCH)
        );

        let results: Collection<DriveItem> = self
            .client
            .get_json(token, &path)
            .instrument(self.span.clone())
            .await?;

        let found = results
            .value
            .into_iter()
            .find(|item| item.is_notebook() && item.name == name);

        info!(
            parent: &self.span,
            operation = "find_notebook",
            subject = %name,
            "Notebook {}",
            if found.is_some() { "found" } else { "not found" }
        );
        Ok(found)
    }
}

/// Write `stream` to `dest` through a `.part` sibling, renamed on success.
///
/// A failed or interrupted stream leaves nothing behind at either path.
async fn save_stream(mut stream: ByteStream, dest: &Path) -> Result<usize> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let result = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<_, Error>(written)
    }
    .await;

    match result {
        Ok(written) => {
            tokio::fs::rename(&partial, dest).await?;
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                warn!(
                    operation = "download_file",
                    subject = %partial.display(),
                    "Failed to remove partial download: {}",
                    cleanup
                );
            }
            Err(e)
        }
    }
}

/// Content path of `file_name` inside `folder_id`.
fn content_path(folder_id: &str, file_name: &str) -> String {
    format!(
        "{}:/{}:/content",
        item_path(folder_id),
        utf8_percent_encode(file_name, SEGMENT)
    )
}

/// Walks the drive folder hierarchy.
pub struct DriveTreeSource {
    drive: OneDrive,
}

impl DriveTreeSource {
    pub fn new(drive: OneDrive) -> Self {
        Self { drive }
    }
}

#[async_trait]
impl TreeSource for DriveTreeSource {
    fn name(&self) -> &str {
        "onedrive"
    }

    fn root_ref(&self) -> String {
        ROOT.to_string()
    }

    async fn list(&self, token: &str, reference: &str) -> Result<Listing> {
        let path = format!("{}/children", item_path(reference));
        let page: Collection<Value> = self.drive.client.get_json(token, &path).await?;
        Ok(Listing {
            items: page.value,
            next_link: page.next_link,
        })
    }

    fn classify(&self, raw: &Value) -> Option<Classified> {
        classify_drive_item(raw)
    }
}
