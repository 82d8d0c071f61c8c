//! LasGo stage client, struct protocol.

use crate::address::{Endpoint, Role};
use crate::connection::{ConnectionConfig, Transport};
use crate::error::{ClientError, DeviceError};
use crate::rpc::{Reply, Request, RpcEngine};
use sara_protocol::lasgo::{
    execute_error, flyscan_error, set_origin_error, CoordSystem, Flyscan, FlyscanChess2021,
    FlyscanTrigger, Job, JobReset, LasgoOp, Origin, Position, QueueStatus, RawStatus, Transform,
    Zone, MOVE_TOLERANCE_MM, ORIGIN_BY_NAME,
};
use sara_protocol::Record;
use std::time::Duration;
use tokio::net::TcpStream;

const DEVICE: &str = "lasgo";

/// Origin selection for [`LasgoClient::set_origin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginRef<'a> {
    Index(i32),
    Name(&'a str),
}

/// Client for the LasGo stage struct protocol.
pub struct LasgoClient<S = TcpStream> {
    rpc: RpcEngine<S>,
}

impl LasgoClient<TcpStream> {
    pub async fn connect(alias: &str, config: ConnectionConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::for_role(Role::Lasgo, alias);
        Self::connect_to(&endpoint, config).await
    }

    pub async fn connect_to(
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        Ok(Self::new(RpcEngine::connect(DEVICE, endpoint, config).await?))
    }
}

impl<S: Transport> LasgoClient<S> {
    pub fn new(rpc: RpcEngine<S>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcEngine<S> {
        &self.rpc
    }

    pub async fn close(self) -> Result<(), ClientError> {
        self.rpc.close().await
    }

    async fn call(&mut self, op: LasgoOp, option: i32) -> Result<Reply, ClientError> {
        self.rpc.call(Request::new(op.code()).with_option(option)).await
    }

    async fn call_with<R: Record>(
        &mut self,
        op: LasgoOp,
        option: i32,
        record: &R,
    ) -> Result<Reply, ClientError> {
        let request = Request::new(op.code()).with_option(option).with_record(record)?;
        self.rpc.call(request).await
    }

    fn check(operation: &'static str, rc: i32, message: &str) -> Result<(), ClientError> {
        if rc != 0 {
            return Err(DeviceError::new(DEVICE, operation, rc, message).into());
        }
        Ok(())
    }

    // =========================================================================
    // Server and coordinates
    // =========================================================================

    /// Asks the server to shut down.
    pub async fn server_end(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(LasgoOp::ServerEnd, 0).await?.return_code())
    }

    pub async fn version(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(LasgoOp::QueryVersion, 0).await?.return_code())
    }

    pub async fn transform(&mut self) -> Result<Transform, ClientError> {
        self.call(LasgoOp::GetTransform, 0).await?.record()
    }

    /// The active origin.
    pub async fn origin(&mut self) -> Result<Origin, ClientError> {
        self.call(LasgoOp::QueryOrigin, 0).await?.record()
    }

    /// Selects the origin by index or by name.
    pub async fn set_origin(&mut self, origin: OriginRef<'_>) -> Result<(), ClientError> {
        let request = match origin {
            OriginRef::Index(index) => Request::new(LasgoOp::SetOrigin.code()).with_option(index),
            // Raw name bytes, no terminator
            OriginRef::Name(name) => Request::new(LasgoOp::SetOrigin.code())
                .with_option(ORIGIN_BY_NAME)
                .with_payload(name.as_bytes().to_vec()),
        };
        let rc = self.rpc.call(request).await?.return_code();
        if rc != 0 {
            return Err(DeviceError::new(DEVICE, "set origin", rc, set_origin_error(rc)).into());
        }
        Ok(())
    }

    // =========================================================================
    // Motion
    // =========================================================================

    pub async fn position(&mut self, system: CoordSystem) -> Result<Position, ClientError> {
        let reply = self.call(LasgoOp::GetPosn, system.code() as i32).await?;
        if reply.return_code() != 0 {
            tracing::error!("Could not get current position (rc {})", reply.return_code());
        }
        reply.record()
    }

    /// Moves and waits for the move to finish.
    pub async fn move_to(
        &mut self,
        system: CoordSystem,
        pos: &Position,
    ) -> Result<(), ClientError> {
        let rc = self
            .call_with(LasgoOp::MoveTo, system.code() as i32, pos)
            .await?
            .return_code();
        Self::check("move to", rc, "could not move")
    }

    /// Queues a move and returns immediately.
    pub async fn queue_to(
        &mut self,
        system: CoordSystem,
        pos: &Position,
    ) -> Result<(), ClientError> {
        let rc = self
            .call_with(LasgoOp::QueueTo, system.code() as i32, pos)
            .await?
            .return_code();
        Self::check("queue to", rc, "could not queue move")
    }

    pub async fn wait_move_done(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(LasgoOp::WaitMoveDone, 0).await?.return_code())
    }

    /// Moves in user coordinates, reads the position back and checks it is
    /// within [`MOVE_TOLERANCE_MM`]. Returns the distance from the target.
    pub async fn move_to_checked(&mut self, pos: &Position) -> Result<f64, ClientError> {
        self.move_to(CoordSystem::User, pos).await?;
        let reached = self.position(CoordSystem::User).await?;
        let distance = pos.distance(&reached);
        tracing::debug!("Movement precision {}", distance);
        if distance > MOVE_TOLERANCE_MM {
            tracing::warn!("Stage stopped {} mm from target", distance);
            return Err(DeviceError::new(
                DEVICE,
                "checked move",
                1,
                format!("stage off target by {:.4} mm", distance),
            )
            .into());
        }
        Ok(distance)
    }

    pub async fn raw_status(&mut self) -> Result<RawStatus, ClientError> {
        self.call(LasgoOp::QueryRawStatus, 0).await?.record()
    }

    /// Aborts a move after waiting `timeout_ms`.
    pub async fn abort_move(&mut self, timeout_ms: i32) -> Result<i32, ClientError> {
        Ok(self.call(LasgoOp::AbortMove, timeout_ms).await?.return_code())
    }

    /// Aborts any action after waiting `timeout_ms`.
    pub async fn panic(&mut self, timeout_ms: i32) -> Result<i32, ClientError> {
        Ok(self.call(LasgoOp::Panic, timeout_ms).await?.return_code())
    }

    // =========================================================================
    // Flyscan
    // =========================================================================

    /// Starts a flyscan; does not block. Poll [`Self::status`] for completion.
    pub async fn execute_flyscan(&mut self, scan: &Flyscan) -> Result<(), ClientError> {
        let rc = self.call_with(LasgoOp::ExecuteFlyscan, 0, scan).await?.return_code();
        self.check_flyscan(rc)
    }

    /// Starts a flyscan with the frame-count layout used at CHESS in 2021.
    pub async fn execute_flyscan_chess2021(
        &mut self,
        scan: &FlyscanChess2021,
    ) -> Result<(), ClientError> {
        let rc = self.call_with(LasgoOp::ExecuteFlyscan, 0, scan).await?.return_code();
        self.check_flyscan(rc)
    }

    fn check_flyscan(&self, rc: i32) -> Result<(), ClientError> {
        if rc != 0 {
            return Err(DeviceError::new(DEVICE, "flyscan", rc, flyscan_error(rc)).into());
        }
        Ok(())
    }

    /// Triggers recorded by the last flyscan.
    pub async fn flyscan_triggers(&mut self) -> Result<Vec<FlyscanTrigger>, ClientError> {
        let reply = self.call(LasgoOp::QueryFlyscanTrig, 0).await?;
        let samples = usize::try_from(reply.return_code()).unwrap_or(0);
        reply.records(samples)
    }

    // =========================================================================
    // Jobs and zones
    // =========================================================================

    pub async fn job(&mut self, reset: JobReset) -> Result<Job, ClientError> {
        self.call(LasgoOp::GetJobStruct, reset.code() as i32).await?.record()
    }

    pub async fn set_job(&mut self, job: &Job) -> Result<(), ClientError> {
        let rc = self.call_with(LasgoOp::SetJobStruct, 0, job).await?.return_code();
        Self::check("set job", rc, "could not set job struct")
    }

    /// The currently configured zone.
    pub async fn zone(&mut self) -> Result<Zone, ClientError> {
        self.call(LasgoOp::GetZoneStruct, 0).await?.record()
    }

    /// Dry-runs a zone. Returns the raw code; non-zero means the hardware
    /// rejects the motion.
    pub async fn validate_zone(&mut self, option: i32, zone: &Zone) -> Result<i32, ClientError> {
        Ok(self
            .call_with(LasgoOp::ValidateZoneScan, option, zone)
            .await?
            .return_code())
    }

    /// Runs zones back to back under an extended `timeout`, restored
    /// afterwards. Returns the raw code; see [`execute_error`].
    pub async fn execute_zones(
        &mut self,
        option: i32,
        zones: &[Zone],
        timeout: Duration,
    ) -> Result<i32, ClientError> {
        let payload = sara_protocol::encode_records(zones)?;
        let request = Request::new(LasgoOp::ExecuteZoneScan.code())
            .with_option(option)
            .with_payload(payload);
        let rc = self.rpc.call_with_timeout(request, timeout).await?.return_code();
        if rc != 0 {
            tracing::error!("Zone execution failed (rc {}): {}", rc, execute_error(rc));
        }
        Ok(rc)
    }

    /// Queue and system status.
    pub async fn status(&mut self) -> Result<QueueStatus, ClientError> {
        let rc = self.call(LasgoOp::QueryStatus, 0).await?.return_code();
        tracing::debug!("Status {:#x}", rc);
        Ok(QueueStatus::from_word(rc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::testing::{reply_bytes, request_bytes, ScriptedStream};
    use sara_protocol::lasgo::execute_option;

    fn client(input: Vec<u8>) -> LasgoClient<ScriptedStream> {
        let conn = Connection::from_stream(
            ScriptedStream::new(input),
            "lasgo",
            ConnectionConfig::default(),
        );
        LasgoClient::new(RpcEngine::new(conn, DEVICE))
    }

    fn written(client: &LasgoClient<ScriptedStream>) -> Vec<u8> {
        client.rpc().connection().get_ref().written().to_vec()
    }

    #[tokio::test]
    async fn test_set_origin_by_name_sends_raw_bytes() {
        let mut lasgo = client(reply_bytes(4, 101, -1, 0, &[]));
        lasgo.set_origin(OriginRef::Name("CO2")).await.unwrap();
        assert_eq!(written(&lasgo), request_bytes(4, 101, -1, b"CO2"));
    }

    #[tokio::test]
    async fn test_set_origin_not_found() {
        let mut lasgo = client(reply_bytes(4, 101, 3, -1, &[]));
        let err = lasgo.set_origin(OriginRef::Index(3)).await.unwrap_err();
        assert_eq!(err.device_code(), Some(-1));
        assert!(err.to_string().contains("origin not found"));
    }

    #[tokio::test]
    async fn test_move_to_checked() {
        let target = Position::new(15.317, -28.002);
        let reached = Position::new(15.3175, -28.002);

        let mut input = reply_bytes(6, 101, 1, 0, &[]);
        input.extend(reply_bytes(5, 102, 1, 0, &reached.encode().unwrap()));
        let mut lasgo = client(input);

        let distance = lasgo.move_to_checked(&target).await.unwrap();
        assert!(distance < MOVE_TOLERANCE_MM);

        let mut expected = request_bytes(6, 101, 1, &target.encode().unwrap());
        expected.extend(request_bytes(5, 102, 1, &[]));
        assert_eq!(written(&lasgo), expected);
    }

    #[tokio::test]
    async fn test_move_to_checked_off_target() {
        let mut input = reply_bytes(6, 101, 1, 0, &[]);
        input.extend(reply_bytes(5, 102, 1, 0, &Position::new(1.0, 1.01).encode().unwrap()));
        let mut lasgo = client(input);

        let result = lasgo.move_to_checked(&Position::new(1.0, 1.0)).await;
        assert!(matches!(result, Err(ClientError::Device(_))));
    }

    #[tokio::test]
    async fn test_panic_uses_its_own_opcode() {
        let mut lasgo = client(reply_bytes(11, 101, 500, 0, &[]));
        lasgo.panic(500).await.unwrap();
        assert_eq!(written(&lasgo), request_bytes(11, 101, 500, &[]));
    }

    #[tokio::test]
    async fn test_flyscan_error() {
        let scan = Flyscan {
            velocity: 900.0,
            ..Flyscan::default()
        };
        let mut lasgo = client(reply_bytes(12, 101, 0, 1, &[]));
        let err = lasgo.execute_flyscan(&scan).await.unwrap_err();
        assert!(err.to_string().contains("velocity out of range"));
    }

    #[tokio::test]
    async fn test_flyscan_triggers_count_from_rc() {
        let triggers = vec![
            FlyscanTrigger {
                x: 1.0,
                ..FlyscanTrigger::default()
            },
            FlyscanTrigger {
                x: 2.0,
                time: 0.5,
                ..FlyscanTrigger::default()
            },
        ];
        let payload = sara_protocol::encode_records(&triggers).unwrap();
        let mut lasgo = client(reply_bytes(13, 101, 0, 2, &payload));

        let received = lasgo.flyscan_triggers().await.unwrap();
        assert_eq!(received, triggers);
    }

    #[tokio::test]
    async fn test_execute_zones_concatenates_and_restores_timeout() {
        let zone = Zone {
            id: "stripe".to_string(),
            power: 40.0,
            ..Zone::default()
        };
        let zones = vec![zone.clone(), zone];
        let option = execute_option(zones.len(), false);
        let mut lasgo = client(reply_bytes(18, 101, option, 0, &[]));

        let rc = lasgo
            .execute_zones(option, &zones, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(rc, 0);

        let sent = written(&lasgo);
        assert_eq!(sent.len(), 24 + 2 * Zone::wire_size());
        assert_eq!(&sent[8..12], &2i32.to_be_bytes());
        assert_eq!(lasgo.rpc().connection().timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_execute_zones_returns_device_code() {
        let mut lasgo = client(reply_bytes(18, 101, 1, 3, &[]));
        let rc = lasgo
            .execute_zones(1, &[Zone::default()], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(rc, 3);
    }

    #[tokio::test]
    async fn test_status_word() {
        let mut lasgo = client(reply_bytes(19, 101, 0, 0x0100, &[]));
        let status = lasgo.status().await.unwrap();
        assert_eq!(status.queue, QueueStatus::STOPPED);
        assert_eq!(status.system, 0);
        assert!(status.is_complete(0));
    }

    #[tokio::test]
    async fn test_job_round_trip_through_server() {
        let job = Job {
            id: "LSA job".to_string(),
            max_accel: 3.0,
            co2_origin: -1,
            ..Job::default()
        };
        let mut input = reply_bytes(14, 101, 0, 0, &job.encode().unwrap());
        input.extend(reply_bytes(15, 102, 0, 0, &[]));
        let mut lasgo = client(input);

        let mut fetched = lasgo.job(JobReset::Current).await.unwrap();
        assert_eq!(fetched, job);
        fetched.max_accel = 1.5;
        lasgo.set_job(&fetched).await.unwrap();

        let sent = written(&lasgo);
        let pushed = Job::decode(&sent[48..]).unwrap();
        assert_eq!(pushed.max_accel, 1.5);
    }
}
