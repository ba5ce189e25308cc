//! Named routes.
//!
//! Servers publish their endpoints and event channels by name; the wire only
//! carries numeric ids. A [`RouteTable`] holds the mapping for one client.

use std::collections::HashMap;

use crate::error::{Result, RoutewireError};

/// Name to route id mapping. Route 0 is reserved.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    by_name: HashMap<String, u32>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name` to `id`, replacing any previous mapping.
    ///
    /// Returns the previous id. Route 0 is rejected and leaves the table
    /// unchanged.
    pub fn insert(&mut self, name: impl Into<String>, id: u32) -> Option<u32> {
        let name = name.into();
        if id == 0 {
            tracing::warn!(route = %name, "route id 0 is reserved, ignoring");
            return None;
        }
        self.by_name.insert(name, id)
    }

    /// Look up a route id by name.
    pub fn resolve(&self, name: &str) -> Result<u32> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RoutewireError::UnknownRoute(name.to_string()))
    }

    /// Reverse lookup, for logging.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        let mut table = RouteTable::new();
        for (name, id) in iter {
            table.insert(name, id);
        }
        table
    }
}

/// Anything that names a route: a numeric id or a name in the route table.
pub trait IntoRoute {
    fn into_route(self, table: &RouteTable) -> Result<u32>;
}

impl IntoRoute for u32 {
    #[inline]
    fn into_route(self, _table: &RouteTable) -> Result<u32> {
        Ok(self)
    }
}

impl IntoRoute for &str {
    fn into_route(self, table: &RouteTable) -> Result<u32> {
        table.resolve(self)
    }
}

impl IntoRoute for &String {
    fn into_route(self, table: &RouteTable) -> Result<u32> {
        table.resolve(self)
    }
}
