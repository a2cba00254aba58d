use crate::communication::messages::{Address, Forwarded, Request, Response};
use crate::error::{SimError, SimResult};
use crate::simulation_engine::intersections::IntersectionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};

type Routes = Arc<Mutex<HashMap<Address, mpsc::Sender<Response>>>>;

/// Addressed request/response channel.
///
/// Requests go into one FIFO queue drained by a single server. Responses are
/// routed by the destination identity they carry to the inbox that identity
/// registered, so any number of requesters can share the channel.
#[derive(Debug)]
pub struct Channel<M> {
    name: String,
    capacity: usize,
    sender: mpsc::Sender<M>,
    receiver: Mutex<Option<mpsc::Receiver<M>>>,
    routes: Routes,
}

/// Channel between the vehicles of one intersection and its relay.
pub type RelayChannel = Channel<Request>;
/// Channel shared by every relay and the arbiter.
pub type ArbiterChannel = Channel<Forwarded>;

impl<M: Send + 'static> Channel<M> {
    pub fn allocate(name: impl Into<String>, capacity: usize) -> SimResult<Self> {
        let name = name.into();
        if capacity == 0 {
            return Err(SimError::exhausted(
                format!("channel `{name}`"),
                "capacity must be at least one message",
            ));
        }
        let (sender, receiver) = mpsc::channel(capacity);
        Ok(Self {
            name,
            capacity,
            sender,
            receiver: Mutex::new(Some(receiver)),
            routes: Arc::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands the request queue to the component serving this channel.
    /// Can only be claimed once.
    pub fn take_server_end(&self) -> SimResult<mpsc::Receiver<M>> {
        let mut slot = self
            .receiver
            .lock()
            .map_err(|_| SimError::exhausted(format!("channel `{}`", self.name), "lock poisoned"))?;
        slot.take().ok_or_else(|| {
            SimError::exhausted(
                format!("channel `{}`", self.name),
                "server end already claimed",
            )
        })
    }

    pub async fn send(&self, message: M) -> SimResult<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SimError::ChannelClosed(self.name.clone()))
    }

    /// Opens an inbox for responses addressed to `address`. The route is
    /// removed again when the returned guard is dropped.
    pub fn register(&self, address: Address) -> SimResult<Registration> {
        let mut routes = self.lock_routes()?;
        if routes.contains_key(&address) {
            return Err(SimError::violation(
                format!("channel `{}`", self.name),
                format!("{address} is already registered"),
            ));
        }
        let (sender, inbox) = mpsc::channel(self.capacity);
        routes.insert(address, sender);
        Ok(Registration {
            address,
            channel: self.name.clone(),
            inbox,
            routes: Arc::clone(&self.routes),
        })
    }

    /// Delivers a response to the inbox registered for its destination.
    pub async fn reply(&self, response: Response) -> SimResult<()> {
        let route = self.lock_routes()?.get(&response.destination).cloned();
        let Some(route) = route else {
            return Err(SimError::violation(
                format!("channel `{}`", self.name),
                format!("no route to {}", response.destination),
            ));
        };
        route
            .send(response)
            .await
            .map_err(|_| {
                SimError::ChannelClosed(format!("{} -> {}", self.name, response.destination))
            })
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().map(|routes| routes.len()).unwrap_or(0)
    }

    fn lock_routes(&self) -> SimResult<MutexGuard<'_, HashMap<Address, mpsc::Sender<Response>>>> {
        self.routes
            .lock()
            .map_err(|_| SimError::exhausted(format!("routes of `{}`", self.name), "lock poisoned"))
    }
}

/// Scoped response inbox on a [`Channel`].
#[derive(Debug)]
pub struct Registration {
    address: Address,
    channel: String,
    inbox: mpsc::Receiver<Response>,
    routes: Routes,
}

impl Registration {
    pub async fn recv(&mut self) -> SimResult<Response> {
        self.inbox
            .recv()
            .await
            .ok_or_else(|| SimError::ChannelClosed(format!("{} -> {}", self.channel, self.address)))
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&self.address);
        }
    }
}

/// Every channel of the simulation plus the per-intersection signal relays
/// raise after changing state.
#[derive(Debug)]
pub struct Switchboard {
    relays: Vec<Arc<RelayChannel>>,
    signals: Vec<Arc<Notify>>,
    arbiter: Arc<ArbiterChannel>,
}

impl Switchboard {
    pub fn allocate(capacity: usize) -> SimResult<Self> {
        let relays = IntersectionId::all()
            .map(|id| Channel::allocate(format!("intersection {id}"), capacity).map(Arc::new))
            .collect::<SimResult<Vec<_>>>()?;
        let signals = IntersectionId::all().map(|_| Arc::new(Notify::new())).collect();
        let arbiter = Arc::new(Channel::allocate("arbiter", capacity)?);
        log::debug!("allocated {} relay channels and the arbiter channel", relays.len());
        Ok(Self {
            relays,
            signals,
            arbiter,
        })
    }

    pub fn relay(&self, id: IntersectionId) -> SimResult<Arc<RelayChannel>> {
        self.relays
            .get(id.index())
            .cloned()
            .ok_or_else(|| {
                SimError::violation("switchboard", format!("no channel for intersection {id}"))
            })
    }

    pub fn state_signal(&self, id: IntersectionId) -> SimResult<Arc<Notify>> {
        self.signals
            .get(id.index())
            .cloned()
            .ok_or_else(|| {
                SimError::violation("switchboard", format!("no signal for intersection {id}"))
            })
    }

    pub fn arbiter(&self) -> Arc<ArbiterChannel> {
        Arc::clone(&self.arbiter)
    }

    pub fn channel_count(&self) -> usize {
        self.relays.len() + 1
    }
}
