//! TCP port reservation table.
//!
//! Reservations are bookkeeping, not enforcement: an automatic allocation
//! asks the OS for a free port by binding port 0, records the number, and
//! releases the socket, so other programs can still race for it. Ports are
//! never freed as a side effect of process exit.

use crate::{
    error::{Error, Result},
    registry::{PortRecord, Registry},
};

use std::net::TcpListener;

use chrono::Utc;

const AUTO_ALLOCATE_ATTEMPTS: u32 = 16;

pub fn allocate(registry: &Registry, port: Option<u16>, name: Option<String>) -> Result<PortRecord> {
    let name = name.unwrap_or_else(|| "default".to_string());

    registry.transact(|catalog| {
        let port = match port {
            Some(requested) if requested != 0 => {
                if catalog.port(requested).is_some() {
                    return Err(Error::conflict("port", requested.to_string()));
                }
                requested
            }
            // Port 0 means "pick one for me", same as no port at all.
            _ => {
                // The ephemeral bind can hand back a port that is free at
                // the OS level but already in our table; ask again.
                let mut picked = None;
                for _ in 0..AUTO_ALLOCATE_ATTEMPTS {
                    let candidate = probe_free_port()?;
                    if catalog.port(candidate).is_none() {
                        picked = Some(candidate);
                        break;
                    }
                }
                picked.ok_or_else(|| {
                    Error::InvalidInput("no free port found that is not already reserved".into())
                })?
            }
        };

        let record = PortRecord {
            port,
            name: name.clone(),
            allocated_at: Utc::now(),
        };
        catalog.ports.push(record.clone());
        Ok(record)
    })
}

pub fn free(registry: &Registry, port: u16) -> Result<PortRecord> {
    registry.transact(|catalog| {
        let record = catalog
            .port(port)
            .cloned()
            .ok_or_else(|| Error::NotFound(port.to_string()))?;
        catalog.ports.retain(|entry| entry.port != port);
        Ok(record)
    })
}

/// The table sorted by port number, optionally filtered by name.
pub fn list(registry: &Registry, name: Option<&str>) -> Result<Vec<PortRecord>> {
    let mut ports = registry.snapshot()?.ports;
    if let Some(name) = name {
        ports.retain(|record| record.name == name);
    }
    ports.sort_by_key(|record| record.port);
    Ok(ports)
}

fn probe_free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|err| Error::io("127.0.0.1:0", err))?;
    let port = listener
        .local_addr()
        .map_err(|err| Error::io("127.0.0.1:0", err))?
        .port();
    Ok(port)
}
