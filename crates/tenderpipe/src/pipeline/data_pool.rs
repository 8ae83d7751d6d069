//! Input of an analysis: content already extracted from tender documents.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::market::FoodCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub doc_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub block_id: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub table_id: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateMention {
    pub kind: String,
    pub value: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub kind: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: String,
    pub value: String,
}

/// A product the tender asks for, optionally with its per-meal portion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default)]
    pub portion_grams: Option<f64>,
    #[serde(default)]
    pub category: Option<FoodCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPool {
    #[serde(default)]
    pub documents: Vec<DocumentInfo>,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub dates: Vec<DateMention>,
    #[serde(default)]
    pub amounts: Vec<Amount>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataPoolError {
    #[error("Data pool contains no documents")]
    NoDocuments,

    #[error("Document at index {0} has an empty id")]
    EmptyDocumentId(usize),

    #[error("Duplicate document id '{0}'")]
    DuplicateDocument(String),

    #[error("{what} '{id}' references unknown document '{doc_id}'")]
    UnknownDocument {
        what: &'static str,
        id: String,
        doc_id: String,
    },

    #[error("Amount '{kind}' must be a finite, non-negative number")]
    InvalidAmount { kind: String },

    #[error("Line item at index {0} has an empty name")]
    EmptyLineItem(usize),
}

impl DataPoolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ValidationError
    }
}

impl DataPool {
    /// Structural checks done at submission, before any job exists.
    pub fn validate(&self) -> Result<(), DataPoolError> {
        if self.documents.is_empty() {
            return Err(DataPoolError::NoDocuments);
        }

        let mut ids = HashSet::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if doc.doc_id.trim().is_empty() {
                return Err(DataPoolError::EmptyDocumentId(i));
            }
            if !ids.insert(doc.doc_id.as_str()) {
                return Err(DataPoolError::DuplicateDocument(doc.doc_id.clone()));
            }
        }

        let check_ref = |what: &'static str, id: &str, doc_id: &Option<String>| match doc_id {
            Some(doc_id) if !ids.contains(doc_id.as_str()) => Err(DataPoolError::UnknownDocument {
                what,
                id: id.to_string(),
                doc_id: doc_id.clone(),
            }),
            _ => Ok(()),
        };
        for block in &self.text_blocks {
            check_ref("Text block", &block.block_id, &block.doc_id)?;
        }
        for table in &self.tables {
            check_ref("Table", &table.table_id, &table.doc_id)?;
        }

        if let Some(bad) = self
            .amounts
            .iter()
            .find(|a| !a.value.is_finite() || a.value < 0.0)
        {
            return Err(DataPoolError::InvalidAmount {
                kind: bad.kind.clone(),
            });
        }

        if let Some(i) = self
            .line_items
            .iter()
            .position(|item| item.name.trim().is_empty())
        {
            return Err(DataPoolError::EmptyLineItem(i));
        }

        Ok(())
    }

    /// Whether anything beyond the document list was extracted.
    pub fn has_content(&self) -> bool {
        self.text_blocks.iter().any(|b| !b.text.trim().is_empty())
            || !self.tables.is_empty()
            || !self.dates.is_empty()
            || !self.amounts.is_empty()
            || !self.entities.is_empty()
            || !self.line_items.is_empty()
            || self
                .raw_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }

    /// All free text: every block followed by the raw text.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.text_blocks
            .iter()
            .map(|b| b.text.as_str())
            .chain(self.raw_text.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> DataPool {
        DataPool {
            documents: vec![DocumentInfo {
                doc_id: "spec".to_string(),
                name: None,
                mime_type: None,
            }],
            text_blocks: vec![TextBlock {
                block_id: "b1".to_string(),
                doc_id: Some("spec".to_string()),
                text: "Meal service for 500 people".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_pool() {
        assert_eq!(pool().validate(), Ok(()));
        assert!(pool().has_content());
    }

    #[test]
    fn test_requires_documents() {
        assert_eq!(DataPool::default().validate(), Err(DataPoolError::NoDocuments));
    }

    #[test]
    fn test_rejects_duplicate_and_empty_ids() {
        let mut p = pool();
        p.documents.push(p.documents[0].clone());
        assert!(matches!(p.validate(), Err(DataPoolError::DuplicateDocument(_))));

        let mut p = pool();
        p.documents[0].doc_id = " ".to_string();
        assert_eq!(p.validate(), Err(DataPoolError::EmptyDocumentId(0)));
    }

    #[test]
    fn test_rejects_dangling_references() {
        let mut p = pool();
        p.text_blocks[0].doc_id = Some("annex".to_string());
        assert!(matches!(p.validate(), Err(DataPoolError::UnknownDocument { .. })));
    }

    #[test]
    fn test_rejects_bad_amounts_and_items() {
        let mut p = pool();
        p.amounts.push(Amount {
            kind: "estimated_budget".to_string(),
            value: -1.0,
        });
        assert!(matches!(p.validate(), Err(DataPoolError::InvalidAmount { .. })));

        let mut p = pool();
        p.line_items.push(LineItem {
            name: "".to_string(),
            portion_grams: None,
            category: None,
        });
        assert_eq!(p.validate(), Err(DataPoolError::EmptyLineItem(0)));
        assert_eq!(DataPoolError::EmptyLineItem(0).kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_documents_alone_are_not_content() {
        let mut p = pool();
        p.text_blocks.clear();
        assert!(!p.has_content());
    }
}
