//! Child-process protocol framing (remote workers) is explicitly out of
//! scope (spec §1) - this module only names the capability boundary the
//! core programs against, mirroring how `pbs-client`'s `BackupReader`/
//! `BackupWriter` expose a thin trait over the wire protocol without this
//! crate knowing HTTP/2 or TLS exist underneath.

use anyhow::Result;

/// What the core asks of a remote worker: "run this request, give me back
/// the response bytes". Framing, retry and connection setup are the
/// concrete implementation's problem (outside this crate's scope).
pub trait RpcClient: Send + Sync {
    fn request(&self, command: &str, payload: &[u8]) -> Result<Vec<u8>>;
}

/// The server side of the same boundary: a worker process receives a
/// command name and payload and returns a response.
pub trait RpcHandler: Send + Sync {
    fn handle(&self, command: &str, payload: &[u8]) -> Result<Vec<u8>>;
}
