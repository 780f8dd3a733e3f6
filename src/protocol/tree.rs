use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::messages::Message;
use crate::{Error, Result};

/// Binary tree over `count` parties, rooted at party 0: the parent of `i`
/// is `(i - 1) / 2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryTree {
    count: usize,
}

impl BinaryTree {

    pub fn new(count: usize) -> Self {
        assert!(count > 0, "[Invalid argument] A tree needs a root.");
        Self { count }
    }

    pub fn count(&self) -> usize {self.count}

    pub fn parent(&self, party: usize) -> Option<usize> {
        (party > 0).then(|| (party - 1) / 2)
    }

    pub fn children(&self, party: usize) -> Vec<usize> {
        [2 * party + 1, 2 * party + 2].into_iter().filter(|&c| c < self.count).collect()
    }

    /// Parties below and including `party`, ascending.
    pub fn subtree(&self, party: usize) -> Vec<usize> {
        let mut out = vec![party];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.children(out[i]));
            i += 1;
        }
        out.sort_unstable();
        out
    }

    /// Edges from the root to the deepest party.
    pub fn height(&self) -> usize {
        (usize::BITS - self.count.leading_zeros() - 1) as usize
    }

}

/// One end of a parent-child link.
pub struct Link {
    peer: usize,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl Link {

    pub fn peer(&self) -> usize {self.peer}

    pub fn send(&self, message: Message) -> Result<()> {
        self.sender.send(message)
            .map_err(|e| Error::Protocol(format!("party {} left before {}", self.peer, e.0.name())))
    }

    /// Next message from the peer, or [Error::PartyTimeout] once `timeout`
    /// passes.
    pub fn receive(&self, timeout: Duration, phase: &'static str) -> Result<Message> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(Error::PartyTimeout { party: self.peer, phase }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Protocol(format!("party {} left during {}", self.peer, phase))),
        }
    }

}

/// The links of one party.
pub struct Endpoint {
    pub party: usize,
    pub parent: Option<Link>,
    pub children: Vec<Link>,
}

impl Endpoint {

    /// Send `make()` to every child.
    pub fn broadcast(&self, make: impl Fn() -> Message) -> Result<()> {
        self.children.iter().try_for_each(|child| child.send(make()))
    }

}

/// Wire up the whole tree; endpoint `i` belongs to party `i`.
pub fn connect(tree: &BinaryTree) -> Vec<Endpoint> {
    let mut endpoints = (0..tree.count())
        .map(|party| Endpoint { party, parent: None, children: vec![] })
        .collect::<Vec<_>>();
    for child in 1..tree.count() {
        let parent = (child - 1) / 2;
        let (down_sender, down_receiver) = channel();
        let (up_sender, up_receiver) = channel();
        endpoints[parent].children.push(Link { peer: child, sender: down_sender, receiver: up_receiver });
        endpoints[child].parent = Some(Link { peer: parent, sender: up_sender, receiver: down_receiver });
    }
    endpoints
}
