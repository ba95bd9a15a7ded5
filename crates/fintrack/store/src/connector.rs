//! The seam between connection management and a concrete backend

use async_trait::async_trait;

use crate::error::StoreResult;

/// Opens, checks and closes connections to a store address.
///
/// `MasterStore` and `TenantRegistry` own the caching and single-flight
/// logic; a connector only knows how to talk to one backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// A shareable handle on an open connection (a pool, usually).
    type Connection: Clone + Send + Sync + 'static;

    /// Open a connection to `address`.
    async fn connect(&self, address: &str) -> StoreResult<Self::Connection>;

    /// Cheap liveness check, no network round trip.
    fn is_healthy(&self, connection: &Self::Connection) -> bool;

    /// Release a connection during shutdown.
    async fn close(&self, connection: Self::Connection);
}

/// Hide the credentials part of a connection URL for logging.
pub fn redact_address(address: &str) -> String {
    let Some((scheme, rest)) = address.split_once("://") else {
        return address.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_userinfo_only() {
        assert_eq!(
            redact_address("postgres://app:s3cret@db:5432/fintrack"),
            "postgres://***@db:5432/fintrack"
        );
        assert_eq!(
            redact_address("postgres://db/fintrack"),
            "postgres://db/fintrack"
        );
        assert_eq!(redact_address("memory:acct_1"), "memory:acct_1");
    }
}
