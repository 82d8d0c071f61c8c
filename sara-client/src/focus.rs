//! Focus module client.

use crate::address::{Endpoint, Role};
use crate::connection::{ConnectionConfig, Transport};
use crate::error::{ClientError, DeviceError};
use crate::rpc::{Reply, Request, RpcEngine};
use sara_protocol::focus::{
    CalibPoint, FocusOp, GridType, MotorStatus, Posn1d, Posn3d, SpecialPoint,
};
use sara_protocol::{encode_records, Record};
use tokio::net::TcpStream;

const DEVICE: &str = "focus";

/// Return code the focus server uses for a failed query.
const QUERY_FAILED: i32 = -1;

/// Client for the focus module server.
pub struct FocusClient<S = TcpStream> {
    rpc: RpcEngine<S>,
}

impl FocusClient<TcpStream> {
    pub async fn connect(alias: &str, config: ConnectionConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::for_role(Role::Focus, alias);
        Self::connect_to(&endpoint, config).await
    }

    pub async fn connect_to(
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        Ok(Self::new(RpcEngine::connect(DEVICE, endpoint, config).await?))
    }
}

impl<S: Transport> FocusClient<S> {
    pub fn new(rpc: RpcEngine<S>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcEngine<S> {
        &self.rpc
    }

    pub async fn close(self) -> Result<(), ClientError> {
        self.rpc.close().await
    }

    async fn call(&mut self, op: FocusOp, option: i32) -> Result<Reply, ClientError> {
        self.rpc.call(Request::new(op.code()).with_option(option)).await
    }

    async fn call_with<R: Record>(
        &mut self,
        op: FocusOp,
        option: i32,
        record: &R,
    ) -> Result<Reply, ClientError> {
        let request = Request::new(op.code()).with_option(option).with_record(record)?;
        self.rpc.call(request).await
    }

    fn check(operation: &'static str, rc: i32) -> Result<(), ClientError> {
        if rc != 0 {
            return Err(DeviceError::new(DEVICE, operation, rc, "request rejected").into());
        }
        Ok(())
    }

    fn check_query(operation: &'static str, rc: i32) -> Result<(), ClientError> {
        if rc == QUERY_FAILED {
            return Err(DeviceError::new(DEVICE, operation, rc, "query failed").into());
        }
        Ok(())
    }

    // =========================================================================
    // Server and sample description
    // =========================================================================

    /// Asks the server to shut down.
    pub async fn server_end(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(FocusOp::ServerEnd, 0).await?.return_code())
    }

    pub async fn version(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(FocusOp::QueryVersion, 0).await?.return_code())
    }

    pub async fn sample_id(&mut self) -> Result<String, ClientError> {
        Ok(self.call(FocusOp::QuerySampleId, 0).await?.text())
    }

    pub async fn set_sample_id(&mut self, id: &str) -> Result<(), ClientError> {
        self.set_text(FocusOp::SetSampleId, "set sample id", id).await
    }

    pub async fn sample_text(&mut self) -> Result<String, ClientError> {
        Ok(self.call(FocusOp::QuerySampleText, 0).await?.text())
    }

    pub async fn set_sample_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.set_text(FocusOp::SetSampleText, "set sample text", text).await
    }

    async fn set_text(
        &mut self,
        op: FocusOp,
        operation: &'static str,
        text: &str,
    ) -> Result<(), ClientError> {
        let request = Request::new(op.code()).with_payload(text.as_bytes().to_vec());
        let rc = self.rpc.call(request).await?.return_code();
        Self::check(operation, rc)
    }

    // =========================================================================
    // Positions
    // =========================================================================

    pub async fn position(&mut self) -> Result<Posn3d, ClientError> {
        self.call(FocusOp::QueryPosn, 0).await?.record()
    }

    /// Focus height at `(x, y)`.
    pub async fn focus_at(&mut self, x: f64, y: f64) -> Result<f64, ClientError> {
        let reply = self.call_with(FocusOp::QueryFocus, 0, &Posn3d::new(x, y, 0.0)).await?;
        Self::check("query focus", reply.return_code())?;
        Ok(reply.record::<Posn3d>()?.z)
    }

    /// Moves to `posn`. See [`sara_protocol::focus::UNCHANGED`] and
    /// [`sara_protocol::focus::FROM_CALIBRATION`] for the sentinel values.
    pub async fn goto(&mut self, posn: &Posn3d) -> Result<(), ClientError> {
        let rc = self.call_with(FocusOp::GotoPosn, 0, posn).await?.return_code();
        Self::check("goto position", rc)
    }

    pub async fn special(&mut self, point: SpecialPoint) -> Result<Posn3d, ClientError> {
        let reply = self.call(FocusOp::QuerySpecial, point.code() as i32).await?;
        Self::check("query special point", reply.return_code())?;
        reply.record()
    }

    pub async fn set_special(
        &mut self,
        point: SpecialPoint,
        posn: &Posn3d,
    ) -> Result<(), ClientError> {
        let rc = self
            .call_with(FocusOp::SetSpecial, point.code() as i32, posn)
            .await?
            .return_code();
        Self::check("set special point", rc)
    }

    pub async fn goto_special(&mut self, point: SpecialPoint) -> Result<(), ClientError> {
        let rc = self.call(FocusOp::GotoSpecial, point.code() as i32).await?.return_code();
        Self::check("goto special point", rc)
    }

    // =========================================================================
    // Sample grid
    // =========================================================================

    pub async fn grid_type(&mut self) -> Result<GridType, ClientError> {
        let rc = self.call(FocusOp::QueryGridType, 0).await?.return_code();
        Self::check_query("query grid type", rc)?;
        u32::try_from(rc)
            .ok()
            .and_then(GridType::from_code)
            .ok_or_else(|| ClientError::InvalidState(format!("unknown grid type {}", rc)))
    }

    pub async fn select_grid_type(&mut self, grid: GridType) -> Result<(), ClientError> {
        let rc = self.call(FocusOp::SelectGridType, grid.code() as i32).await?.return_code();
        Self::check("select grid type", rc)
    }

    /// Calibration points of the active grid; the count comes from the
    /// return code.
    pub async fn sample_grid(&mut self) -> Result<Vec<CalibPoint>, ClientError> {
        let reply = self.call(FocusOp::QuerySampleGrid, 0).await?;
        let rc = reply.return_code();
        let count = usize::try_from(rc).map_err(|_| {
            DeviceError::new(DEVICE, "query sample grid", rc, "wrong number of grid points")
        })?;
        reply.records(count)
    }

    pub async fn set_sample_grid(&mut self, points: &[CalibPoint]) -> Result<(), ClientError> {
        let count = i32::try_from(points.len())
            .map_err(|_| ClientError::InvalidArgument(format!("{} grid points", points.len())))?;
        let request = Request::new(FocusOp::SetSampleGrid.code())
            .with_option(count)
            .with_payload(encode_records(points)?);
        let rc = self.rpc.call(request).await?.return_code();
        Self::check("set sample grid", rc)
    }

    pub async fn goto_grid_point(&mut self, index: i32) -> Result<(), ClientError> {
        let rc = self.call(FocusOp::GotoSampleGrid, index).await?.return_code();
        Self::check("goto grid point", rc)
    }

    // =========================================================================
    // Z motor
    // =========================================================================

    pub async fn motor_status(&mut self) -> Result<MotorStatus, ClientError> {
        let rc = self.call(FocusOp::QueryZMotorStatus, 0).await?.return_code();
        Self::check_query("query motor status", rc)?;
        Ok(MotorStatus::from_bits(rc as u32))
    }

    pub async fn motor_engaged(&mut self) -> Result<bool, ClientError> {
        let rc = self.call(FocusOp::QueryZMotorEngage, 0).await?.return_code();
        Self::check_query("query motor engage", rc)?;
        Ok(rc == 1)
    }

    pub async fn set_motor_engaged(&mut self, engaged: bool) -> Result<(), ClientError> {
        let rc = self
            .call(FocusOp::SetZMotorEngage, i32::from(engaged))
            .await?
            .return_code();
        Self::check("set motor engage", rc)
    }

    pub async fn motor_position(&mut self) -> Result<f64, ClientError> {
        let reply = self.call(FocusOp::QueryZMotorPosn, 0).await?;
        Self::check_query("query motor position", reply.return_code())?;
        Ok(reply.record::<Posn1d>()?.z)
    }

    /// Starts a z move and returns at once.
    pub async fn set_motor_position(&mut self, z: f64) -> Result<(), ClientError> {
        let rc = self
            .call_with(FocusOp::SetZMotorPosn, 0, &Posn1d { z })
            .await?
            .return_code();
        Self::check("set motor position", rc)
    }

    /// Moves z and returns when the move is done.
    pub async fn set_motor_position_wait(&mut self, z: f64) -> Result<(), ClientError> {
        let rc = self
            .call_with(FocusOp::SetZMotorPosnWait, 0, &Posn1d { z })
            .await?
            .return_code();
        Self::check("set motor position", rc)
    }
}
