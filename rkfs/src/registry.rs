//! Handle registry
//!
//! A single task owns the token → handle map and serves requests from an mpsc
//! channel in arrival order, so register/lookup/remove/evict are linearizable
//! without locks around the map. `remove` and `evict_if` are the only ways a
//! handle leaves the map; whoever gets it back owns its teardown.

use crate::backend::{HandleStream, Session};
use crate::handle::Handle;
use crate::token::new_token;
use common::{HandleToken, RkfsError};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const REGISTRY_QUEUE: usize = 1024;

type Visitor = Box<dyn FnMut(&Handle) -> bool + Send>;

enum Command {
    Register {
        path: String,
        identity: String,
        session: Box<dyn Session>,
        stream: HandleStream,
        reply: oneshot::Sender<Arc<Handle>>,
    },
    Lookup {
        token: HandleToken,
        reply: oneshot::Sender<Option<Arc<Handle>>>,
    },
    Remove {
        token: HandleToken,
        reply: oneshot::Sender<Option<Arc<Handle>>>,
    },
    EvictIf {
        visitor: Visitor,
        reply: oneshot::Sender<Vec<Arc<Handle>>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Clone)]
pub struct Registry {
    tx: mpsc::Sender<Command>,
}

impl Registry {
    /// Start the coordinator task. It stops once every `Registry` clone is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(REGISTRY_QUEUE);
        tokio::spawn(run(rx));
        Self { tx }
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RkfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RkfsError::Io("handle registry is shut down".into()))?;
        rx.await
            .map_err(|_| RkfsError::Io("handle registry dropped the request".into()))
    }

    /// Insert a new handle under a freshly generated token.
    pub async fn register(
        &self,
        path: &str,
        identity: &str,
        session: Box<dyn Session>,
        stream: HandleStream,
    ) -> Result<Arc<Handle>, RkfsError> {
        let path = path.to_string();
        let identity = identity.to_string();
        self.call(|reply| Command::Register {
            path,
            identity,
            session,
            stream,
            reply,
        })
        .await
    }

    pub async fn lookup(&self, token: HandleToken) -> Result<Arc<Handle>, RkfsError> {
        self.call(|reply| Command::Lookup { token, reply })
            .await?
            .ok_or_else(|| unknown(token))
    }

    /// Atomically take the handle out. Of concurrent removers only one succeeds;
    /// the rest get `NotFound`.
    pub async fn remove(&self, token: HandleToken) -> Result<Arc<Handle>, RkfsError> {
        self.call(|reply| Command::Remove { token, reply })
            .await?
            .ok_or_else(|| unknown(token))
    }

    /// Visit every entry inside the coordinator and remove those the visitor selects,
    /// deciding and removing in one step.
    pub async fn evict_if<F>(&self, visitor: F) -> Result<Vec<Arc<Handle>>, RkfsError>
    where
        F: FnMut(&Handle) -> bool + Send + 'static,
    {
        self.call(|reply| Command::EvictIf {
            visitor: Box::new(visitor),
            reply,
        })
        .await
    }

    pub async fn len(&self) -> Result<usize, RkfsError> {
        self.call(|reply| Command::Len { reply }).await
    }
}

fn unknown(token: HandleToken) -> RkfsError {
    RkfsError::NotFound(format!("unknown handle {token}"))
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut handles: HashMap<HandleToken, Arc<Handle>> = HashMap::new();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register {
                path,
                identity,
                session,
                stream,
                reply,
            } => {
                let token = new_token(|t| handles.contains_key(t));
                let handle = Arc::new(Handle::new(token, path, identity, session, stream));
                handles.insert(token, handle.clone());
                let _ = reply.send(handle);
            }
            Command::Lookup { token, reply } => {
                let _ = reply.send(handles.get(&token).cloned());
            }
            Command::Remove { token, reply } => {
                let _ = reply.send(handles.remove(&token));
            }
            Command::EvictIf { mut visitor, reply } => {
                let mut evicted = Vec::new();
                handles.retain(|_, h| {
                    if visitor(h.as_ref()) {
                        evicted.push(h.clone());
                        false
                    } else {
                        true
                    }
                });
                let _ = reply.send(evicted);
            }
            Command::Len { reply } => {
                let _ = reply.send(handles.len());
            }
        }
    }
    debug!("handle registry stopped with {} live handles", handles.len());
}
