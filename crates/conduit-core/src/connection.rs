//! Shared connections owned by the host.
//!
//! A host may keep a pool of open connections and lend them to activities.
//! The activity publishes through the borrowed connection but never closes
//! it; the pool alone decides when the connection goes away.

use std::any::Any;
use std::sync::Arc;

/// A connection owned by an external pool.
pub trait ConnectionManager: Send + Sync {
    /// Kind of connection, for example `mqtt`.
    fn connection_type(&self) -> &str;

    /// The underlying connection object. Connectors downcast it to the
    /// concrete type they expect.
    fn connection(&self) -> Arc<dyn Any + Send + Sync>;
}

/// Dynamic connection manager wrapper for trait objects.
pub type SharedConnection = Arc<dyn ConnectionManager>;

/// Connection manager lending a single pooled value.
pub struct PooledConnection {
    connection_type: String,
    connection: Arc<dyn Any + Send + Sync>,
}

impl PooledConnection {
    /// Wrap a pooled connection.
    pub fn new<T: Any + Send + Sync>(connection_type: impl Into<String>, connection: T) -> Self {
        Self {
            connection_type: connection_type.into(),
            connection: Arc::new(connection),
        }
    }
}

impl ConnectionManager for PooledConnection {
    fn connection_type(&self) -> &str {
        &self.connection_type
    }

    fn connection(&self) -> Arc<dyn Any + Send + Sync> {
        self.connection.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pooled_connection_downcast() {
        let pooled = PooledConnection::new("test", String::from("conn-1"));
        assert_eq!(pooled.connection_type(), "test");

        let conn = pooled.connection();
        assert_eq!(conn.downcast_ref::<String>().map(String::as_str), Some("conn-1"));
        assert!(conn.downcast_ref::<u32>().is_none());
    }
}
