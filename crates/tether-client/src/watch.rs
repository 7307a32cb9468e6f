//! The set of peers whose presence this session observes.

/// Ordered, duplicate-free list of peer ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    peers: Vec<String>,
}

impl WatchSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add peers not already present, keeping first-insertion order.
    ///
    /// Returns how many were added.
    pub fn extend<I, S>(&mut self, peers: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.peers.len();
        for peer in peers {
            let peer = peer.into();
            if !self.contains(&peer) {
                self.peers.push(peer);
            }
        }
        self.peers.len() - before
    }

    /// Remove peers; absent ones are ignored. Returns how many were removed.
    pub fn remove<'a, I>(&mut self, peers: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let before = self.peers.len();
        for peer in peers {
            self.peers.retain(|p| p != peer);
        }
        before - self.peers.len()
    }

    /// Replace the whole set.
    pub fn replace<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers.clear();
        self.extend(peers);
    }

    #[must_use]
    pub fn contains(&self, peer: &str) -> bool {
        self.peers.iter().any(|p| p == peer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.peers.clone()
    }
}
