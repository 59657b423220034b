//! Contact and group storage
//!
//! `ContactStore` is the read side the dispatch engine consumes.
//! `MemoryContactStore` is a complete in-process implementation with the
//! write operations a console needs (contacts, custom names, groups) and
//! the import of the paired account's address book.
//!
//! Duplicates are idempotent: adding a phone that already exists, a group
//! name that already exists or a member already in the group returns the
//! existing record instead of failing.

use crate::error::{DispatchError, Result};
use crate::session::SessionManager;
use crate::transport::RemoteContact;
use crate::types::{normalize_address, Recipient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Address suffix of individual (non-group) chats
const INDIVIDUAL_CHAT_SUFFIX: &str = "@c.us";

/// Placeholder name the chat network reports for unnamed contacts
const UNKNOWN_NAME: &str = "Unknown";

/// Read-only contact access used by the dispatch engine
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Every known contact as a recipient
    async fn list_recipients(&self) -> Result<Vec<Recipient>>;

    /// Members of a group, in the order they were added
    async fn list_group_members(&self, group_id: &str) -> Result<Vec<Recipient>>;

    /// A single contact by id
    async fn get(&self, id: &str) -> Result<Recipient>;
}

/// A stored contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    /// Normalized phone number, unique across the store
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

impl Contact {
    pub fn to_recipient(&self) -> Recipient {
        Recipient {
            id: self.id.clone(),
            address: self.phone.clone(),
            display_name: self.name.clone(),
            custom_name: self.custom_name.clone(),
        }
    }
}

/// A named contact group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    /// Contact ids in insertion order
    pub members: Vec<String>,
}

/// Group listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub contact_count: usize,
}

#[derive(Default)]
struct Book {
    contacts: HashMap<String, Contact>,
    /// Contact ids in insertion order
    order: Vec<String>,
    by_phone: HashMap<String, String>,
    groups: HashMap<String, Group>,
    group_order: Vec<String>,
}

impl Book {
    fn insert_contact(&mut self, name: &str, phone: String) -> (Contact, bool) {
        if let Some(existing) = self
            .by_phone
            .get(&phone)
            .and_then(|id| self.contacts.get(id))
        {
            return (existing.clone(), false);
        }

        let contact = Contact {
            id: format!("contact-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            phone: phone.clone(),
            custom_name: None,
        };
        self.by_phone.insert(phone, contact.id.clone());
        self.order.push(contact.id.clone());
        self.contacts.insert(contact.id.clone(), contact.clone());
        (contact, true)
    }

    fn contact(&self, id: &str) -> Result<&Contact> {
        self.contacts
            .get(id)
            .ok_or_else(|| DispatchError::UnknownRecipient(id.to_string()))
    }

    fn group_mut(&mut self, id: &str) -> Result<&mut Group> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| DispatchError::GroupNotFound(id.to_string()))
    }
}

/// In-memory contact store
#[derive(Default)]
pub struct MemoryContactStore {
    book: RwLock<Book>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contact, or return the existing one with the same phone
    pub async fn add_contact(&self, name: &str, phone: &str) -> Contact {
        let (contact, created) = self
            .book
            .write()
            .await
            .insert_contact(name, normalize_address(phone));
        if created {
            tracing::debug!(contact_id = %contact.id, "Contact added");
        }
        contact
    }

    /// Set or clear the name used for personalization
    pub async fn set_custom_name(&self, id: &str, custom_name: Option<&str>) -> Result<Contact> {
        let mut book = self.book.write().await;
        let contact = book
            .contacts
            .get_mut(id)
            .ok_or_else(|| DispatchError::UnknownRecipient(id.to_string()))?;
        contact.custom_name = custom_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Ok(contact.clone())
    }

    /// All contacts in insertion order
    pub async fn contacts(&self) -> Vec<Contact> {
        let book = self.book.read().await;
        book.order
            .iter()
            .filter_map(|id| book.contacts.get(id).cloned())
            .collect()
    }

    /// Create a group, or return the existing one with the same name
    pub async fn create_group(&self, name: &str) -> Group {
        let mut book = self.book.write().await;
        if let Some(existing) = book.groups.values().find(|g| g.name == name) {
            return existing.clone();
        }

        let group = Group {
            id: format!("group-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            members: Vec::new(),
        };
        book.group_order.push(group.id.clone());
        book.groups.insert(group.id.clone(), group.clone());
        tracing::debug!(group_id = %group.id, name = %name, "Group created");
        group
    }

    /// Remove a group; its contacts are kept
    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        let mut book = self.book.write().await;
        book.groups
            .remove(group_id)
            .ok_or_else(|| DispatchError::GroupNotFound(group_id.to_string()))?;
        book.group_order.retain(|id| id != group_id);
        Ok(())
    }

    /// Add a contact to a group
    ///
    /// Returns false if the contact was already a member.
    pub async fn add_to_group(&self, group_id: &str, contact_id: &str) -> Result<bool> {
        let mut book = self.book.write().await;
        book.contact(contact_id)?;
        let group = book.group_mut(group_id)?;

        if group.members.iter().any(|id| id == contact_id) {
            return Ok(false);
        }
        group.members.push(contact_id.to_string());
        Ok(true)
    }

    /// Remove a contact from a group
    ///
    /// Returns false if the contact was not a member.
    pub async fn remove_from_group(&self, group_id: &str, contact_id: &str) -> Result<bool> {
        let mut book = self.book.write().await;
        let group = book.group_mut(group_id)?;
        let before = group.members.len();
        group.members.retain(|id| id != contact_id);
        Ok(group.members.len() != before)
    }

    /// Groups with their member counts, in creation order
    pub async fn groups(&self) -> Vec<GroupSummary> {
        let book = self.book.read().await;
        book.group_order
            .iter()
            .filter_map(|id| book.groups.get(id))
            .map(|group| GroupSummary {
                id: group.id.clone(),
                name: group.name.clone(),
                contact_count: group.members.len(),
            })
            .collect()
    }

    /// Import an address book from the chat network
    ///
    /// Only individual chats with a real name are kept. Existing phones are
    /// left untouched, custom name included. Returns the number of new
    /// contacts.
    pub async fn import_contacts(&self, remote: &[RemoteContact]) -> usize {
        let mut book = self.book.write().await;
        let mut imported = 0;

        for contact in remote {
            let Some(phone) = contact.address.strip_suffix(INDIVIDUAL_CHAT_SUFFIX) else {
                continue;
            };
            let name = match contact.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() && name != UNKNOWN_NAME => name,
                _ => continue,
            };

            let phone = normalize_address(phone);
            if phone.is_empty() {
                continue;
            }
            if book.insert_contact(name, phone).1 {
                imported += 1;
            }
        }

        tracing::info!(
            received = remote.len(),
            imported,
            "Imported contacts from chat network"
        );
        imported
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self
            .contacts()
            .await
            .iter()
            .map(Contact::to_recipient)
            .collect())
    }

    async fn list_group_members(&self, group_id: &str) -> Result<Vec<Recipient>> {
        let book = self.book.read().await;
        let group = book
            .groups
            .get(group_id)
            .ok_or_else(|| DispatchError::GroupNotFound(group_id.to_string()))?;

        Ok(group
            .members
            .iter()
            .filter_map(|id| book.contacts.get(id))
            .map(Contact::to_recipient)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Recipient> {
        Ok(self.book.read().await.contact(id)?.to_recipient())
    }
}

/// Pull the paired account's address book into a store
pub async fn sync_from_session(
    session: &SessionManager,
    store: &MemoryContactStore,
) -> Result<usize> {
    let remote = session.fetch_contacts().await?;
    Ok(store.import_contacts(&remote).await)
}
