//! Microsoft Graph access for OneDrive and OneNote.
//!
//! [`GraphClient`] issues single-attempt REST calls, [`OneDrive`] and
//! [`OneNote`] wrap the service operations, and [`TreeWalker`] builds
//! resource trees from any [`TreeSource`].

pub mod client;
pub mod drive;
pub mod memory;
pub mod onenote;
pub mod tree;

pub use client::{ByteStream, Collection, GraphClient, GraphConfig, GRAPH_API_BASE};
pub use drive::{DriveItem, DriveTreeSource, OneDrive};
pub use memory::MemoryTreeSource;
pub use onenote::{Notebook, NotebookTreeSource, OneNote, Page, Section};
pub use tree::{Classified, Listing, TreeSource, TreeWalker, WalkOptions, WalkResult};
