//! Cluster members and versioned views.
//!
//! Views are produced by the membership layer and only read by the engine.
//! [`ViewHandle`] is the shared slot the membership layer installs new views
//! into.

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use log::info;
use serde::{Deserialize, Serialize};

/// A cluster participant. Identity is the socket address; the name is a label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    name: String,
    addr: SocketAddr,
}

impl Member {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.addr)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Ordered, versioned snapshot of reachable members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    id: u64,
    members: Vec<Member>,
}

impl View {
    #[must_use]
    pub const fn new(id: u64, members: Vec<Member>) -> Self {
        Self { id, members }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The first member of the view.
    #[must_use]
    pub fn coordinator(&self) -> Option<&Member> {
        self.members.first()
    }

    /// Looks a member up by address.
    #[must_use]
    pub fn find(&self, addr: SocketAddr) -> Option<&Member> {
        self.members.iter().find(|m| m.addr == addr)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.coordinator() {
            Some(coord) => write!(f, "[{coord}|{}] ({}) [", self.id, self.size())?,
            None => write!(f, "[-|{}] (0) [", self.id)?,
        }
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{m}")?;
        }
        write!(f, "]")
    }
}

/// Shared slot holding the latest view.
#[derive(Debug, Clone)]
pub struct ViewHandle {
    inner: Arc<RwLock<Arc<View>>>,
}

impl ViewHandle {
    #[must_use]
    pub fn new(view: View) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(view))),
        }
    }

    /// The latest installed view.
    #[must_use]
    pub fn current(&self) -> Arc<View> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `view` unless a view with the same or a newer id is already
    /// installed. Returns whether the view was accepted.
    pub fn install(&self, view: View) -> bool {
        let mut current = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if view.id <= current.id {
            return false;
        }
        info!("** view: {view}");
        *current = Arc::new(view);
        true
    }
}
