//! Single-flight poll coordinator.
//!
//! The coordinator owns the transport behind an async mutex, so one poll cycle
//! (write, delay, read) finishes before the next one starts. The latest
//! [`Snapshot`] is published through a `watch` channel; readers get an
//! immutable `Arc` and never block a running cycle.
//!
//! ```no_run
//! use antrabms_lib::coordinator::Coordinator;
//! use antrabms_lib::tokio_serial_async::{AntraBMS, Error};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Error> {
//!     let coordinator = Coordinator::new(AntraBMS::new("/dev/ttyUSB0", 9600)?, 4);
//!     let mut updates = coordinator.subscribe();
//!
//!     tokio::spawn(async move {
//!         while updates.changed().await.is_ok() {
//!             if let Some(snapshot) = updates.borrow_and_update().clone() {
//!                 println!("SOC {}%", snapshot.group.soc);
//!             }
//!         }
//!     });
//!
//!     coordinator.refresh().await;
//!     Ok(())
//! }
//! ```

use crate::protocol::MAX_BATTERIES_PER_GROUP;
use crate::snapshot::Snapshot;
use crate::tokio_serial_async::{AntraBMS, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio_serial::SerialStream;

pub type SharedSnapshot = Option<Arc<Snapshot>>;

/// Upper bound for the configured battery count.
pub const MAX_CONFIGURED_BATTERIES: u8 = 15;

#[derive(Debug)]
pub struct Coordinator<T = SerialStream> {
    bms: Mutex<AntraBMS<T>>,
    battery_count: u8,
    snapshot: watch::Sender<SharedSnapshot>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Coordinator<T> {
    /// `battery_count` is the number of batteries expected in the group; values
    /// above [`MAX_BATTERIES_PER_GROUP`] are capped.
    pub fn new(bms: AntraBMS<T>, battery_count: u8) -> Self {
        let capped = battery_count.clamp(1, MAX_BATTERIES_PER_GROUP);
        if capped != battery_count {
            log::warn!("battery count {battery_count} out of range, use {capped}");
        }
        let (snapshot, _) = watch::channel(None);
        Self {
            bms: Mutex::new(bms),
            battery_count: capped,
            snapshot,
        }
    }

    pub fn battery_count(&self) -> u8 {
        self.battery_count
    }

    pub fn subscribe(&self) -> watch::Receiver<SharedSnapshot> {
        self.snapshot.subscribe()
    }

    /// Latest published snapshot, `None` until the first successful cycle.
    pub fn snapshot(&self) -> SharedSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Runs one poll cycle and publishes its result.
    pub async fn try_refresh(&self) -> Result<Arc<Snapshot>> {
        let (group, snapshot) = {
            let mut bms = self.bms.lock().await;
            (bms.group(), Arc::new(bms.get_analog_data().await?))
        };
        if snapshot.group.battery_count != self.battery_count {
            log::warn!(
                "Group {group} reports {} batteries, {} configured",
                snapshot.group.battery_count,
                self.battery_count
            );
        }
        if !snapshot.is_complete() {
            log::warn!(
                "Group {group}: batteries {:?} could not be decoded this cycle",
                snapshot.failed_batteries
            );
        }
        self.snapshot.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Runs one poll cycle; on failure logs the error and returns the previous snapshot.
    pub async fn refresh(&self) -> SharedSnapshot {
        match self.try_refresh().await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                log::error!("Poll cycle failed, keeping previous data: {err}");
                self.snapshot()
            }
        }
    }

    pub async fn protocol_version(&self) -> Result<String> {
        self.bms.lock().await.get_protocol_version().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::tests::{nominal_block, HEADER};
    use crate::protocol::{build_frame, EOI};
    use crate::tokio_serial_async::Error;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn coordinator() -> (Coordinator<DuplexStream>, DuplexStream) {
        let (client, bms) = tokio::io::duplex(8192);
        (Coordinator::new(AntraBMS::from_stream(client), 4), bms)
    }

    fn analog_reply() -> Vec<u8> {
        let info = format!(
            "{HEADER}{}{}{}{}",
            nominal_block(0),
            nominal_block(1),
            nominal_block(2),
            nominal_block(3)
        );
        build_frame(0x22, 0x00, 0x4A, 0x00, 0x1000 | info.len() as u16, &info)
    }

    async fn answer(bms: &mut DuplexStream, reply: Option<Vec<u8>>) {
        while bms.read_u8().await.unwrap() != EOI {}
        if let Some(reply) = reply {
            bms.write_all(&reply).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_publishes_snapshot() {
        let (coordinator, mut bms) = coordinator();
        let mut updates = coordinator.subscribe();
        assert!(coordinator.snapshot().is_none());

        let (snapshot, _) = tokio::join!(
            coordinator.refresh(),
            answer(&mut bms, Some(analog_reply()))
        );
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.batteries.len(), 4);
        assert!(updates.has_changed().unwrap());
        assert!(Arc::ptr_eq(
            updates.borrow_and_update().as_ref().unwrap(),
            &snapshot
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_keeps_previous_snapshot() {
        let (coordinator, mut bms) = coordinator();
        let (first, _) = tokio::join!(
            coordinator.refresh(),
            answer(&mut bms, Some(analog_reply()))
        );
        let first = first.unwrap();

        let (second, _) = tokio::join!(coordinator.refresh(), answer(&mut bms, None));
        assert!(Arc::ptr_eq(&second.unwrap(), &first));
        assert!(Arc::ptr_eq(&coordinator.snapshot().unwrap(), &first));

        let (third, _) = tokio::join!(coordinator.try_refresh(), answer(&mut bms, None));
        assert!(matches!(third, Err(Error::TokioElapsed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_do_not_interleave() {
        let (coordinator, mut bms) = coordinator();
        let fake = async {
            for _ in 0..2 {
                let mut request = Vec::new();
                loop {
                    let byte = bms.read_u8().await.unwrap();
                    request.push(byte);
                    if byte == EOI {
                        break;
                    }
                }
                assert_eq!(request, b"~22004A42E002FFFCFE\r");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                bms.write_all(&analog_reply()).await.unwrap();
            }
        };
        let (first, second, _) = tokio::join!(coordinator.refresh(), coordinator.refresh(), fake);
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(!Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    #[test]
    fn battery_count_is_capped() {
        let (client, _bms) = tokio::io::duplex(64);
        assert_eq!(Coordinator::new(AntraBMS::from_stream(client), 15).battery_count(), 12);
        let (client, _bms) = tokio::io::duplex(64);
        assert_eq!(Coordinator::new(AntraBMS::from_stream(client), 0).battery_count(), 1);
    }
}
