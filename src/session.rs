//! Filter selections held across invocations, persisted as YAML.
//!
//! The session is owned by the command layer. Query and filter functions never
//! see it; they receive the resolved values through [`SessionContext::predicate`]
//! or direct arguments.

use std::{
    fs::{self, File},
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    filter::{DateRange, Predicate, build_predicate},
    shape::DatasetDescriptor,
};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContext {
    pub date_range: Option<DateRange>,
    pub regions: Vec<String>,
    pub products: Vec<String>,
    pub top_n: usize,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            date_range: None,
            regions: Vec::new(),
            products: Vec::new(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Selections supplied on one invocation; `None` leaves the session value as is.
#[derive(Debug, Clone, Default)]
pub struct SelectionUpdate {
    pub date_range: Option<DateRange>,
    pub regions: Option<Vec<String>>,
    pub products: Option<Vec<String>>,
    pub top_n: Option<usize>,
}

impl SessionContext {
    /// Loads a session file; a missing file is an empty session.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No session at {path:?}; starting fresh");
            return Ok(Self::default());
        }
        let file = File::open(path).with_context(|| format!("Opening session file {path:?}"))?;
        let session: Self = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing session file {path:?}"))?;
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating session directory {parent:?}"))?;
        }
        let yaml = serde_yaml::to_string(self).context("Serializing session")?;
        fs::write(path, yaml).with_context(|| format!("Writing session file {path:?}"))?;
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, update: SelectionUpdate) {
        if let Some(range) = update.date_range {
            self.date_range = Some(range);
        }
        if let Some(regions) = update.regions {
            self.regions = regions;
        }
        if let Some(products) = update.products {
            self.products = products;
        }
        if let Some(top_n) = update.top_n {
            self.top_n = top_n;
        }
    }

    pub fn predicate(&self, descriptor: &DatasetDescriptor) -> Predicate {
        build_predicate(
            descriptor,
            self.date_range.as_ref(),
            &self.regions,
            &self.products,
        )
    }
}
