//! Spectrometer client.

use crate::address::{Endpoint, Role};
use crate::connection::{ConnectionConfig, Transport};
use crate::error::{ClientError, DeviceError};
use crate::rpc::{Reply, Request, RpcEngine};
use sara_protocol::spectrometer::{
    set_integration_error, IntegrationParms, SpecOp, SpectrometerInfo, SpectrumInfo, NOT_ACQUIRED,
};
use sara_protocol::Record;
use tokio::net::TcpStream;

const DEVICE: &str = "spec";

/// Client for the spectrometer server.
pub struct SpectrometerClient<S = TcpStream> {
    rpc: RpcEngine<S>,
}

impl SpectrometerClient<TcpStream> {
    pub async fn connect(alias: &str, config: ConnectionConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::for_role(Role::Spec, alias);
        Self::connect_to(&endpoint, config).await
    }

    pub async fn connect_to(
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        Ok(Self::new(RpcEngine::connect(DEVICE, endpoint, config).await?))
    }
}

impl<S: Transport> SpectrometerClient<S> {
    pub fn new(rpc: RpcEngine<S>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcEngine<S> {
        &self.rpc
    }

    pub async fn close(self) -> Result<(), ClientError> {
        self.rpc.close().await
    }

    async fn call(&mut self, op: SpecOp) -> Result<Reply, ClientError> {
        self.rpc.call(Request::new(op.code())).await
    }

    /// Maps the return code of a data fetch.
    fn check_acquired(operation: &'static str, rc: i32) -> Result<(), ClientError> {
        match rc {
            0 => Ok(()),
            NOT_ACQUIRED => Err(DeviceError::new(DEVICE, operation, rc, "acquire first").into()),
            _ => Err(DeviceError::new(DEVICE, operation, rc, "data unavailable").into()),
        }
    }

    pub async fn version(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(SpecOp::QueryVersion).await?.return_code())
    }

    pub async fn info(&mut self) -> Result<SpectrometerInfo, ClientError> {
        self.call(SpecOp::GetSpectrometerInfo).await?.record()
    }

    /// Wavelength of every pixel; `npoints` comes from [`Self::info`].
    pub async fn wavelengths(&mut self, npoints: usize) -> Result<Vec<f64>, ClientError> {
        self.call(SpecOp::GetWavelengths).await?.f64_array(npoints)
    }

    pub async fn integration(&mut self) -> Result<IntegrationParms, ClientError> {
        self.call(SpecOp::GetIntegrationParms).await?.record()
    }

    pub async fn set_integration(&mut self, parms: &IntegrationParms) -> Result<(), ClientError> {
        let request = Request::new(SpecOp::SetIntegrationParms.code()).with_record(parms)?;
        let rc = self.rpc.call(request).await?.return_code();
        if rc != 0 {
            tracing::error!("{}: set integration rejected: {}", DEVICE, set_integration_error(rc));
            let message = set_integration_error(rc);
            return Err(DeviceError::new(DEVICE, "set integration", rc, message).into());
        }
        Ok(())
    }

    /// Starts one acquisition.
    pub async fn acquire(&mut self) -> Result<(), ClientError> {
        self.call(SpecOp::AcquireSpectrum).await?;
        Ok(())
    }

    pub async fn spectrum_info(&mut self) -> Result<SpectrumInfo, ClientError> {
        self.call(SpecOp::GetSpectrumInfo).await?.record()
    }

    /// Intensities of the last acquisition.
    pub async fn spectrum_data(&mut self, npoints: usize) -> Result<Vec<f64>, ClientError> {
        let reply = self.call(SpecOp::GetSpectrumData).await?;
        Self::check_acquired("spectrum data", reply.return_code())?;
        reply.f64_array(npoints)
    }

    /// Acquires the full set of spectra and returns how many there are.
    pub async fn acquire_complete(&mut self) -> Result<usize, ClientError> {
        let reply = self.call(SpecOp::AcquireCompleteSpectrum).await?;
        usize::try_from(reply.option()).map_err(|_| {
            ClientError::Device(DeviceError::new(
                DEVICE,
                "acquire complete",
                reply.option(),
                "negative spectrum count",
            ))
        })
    }

    /// Every spectrum of the last complete acquisition, one row each.
    pub async fn complete_data(
        &mut self,
        npoints: usize,
        nspect: usize,
    ) -> Result<Vec<Vec<f64>>, ClientError> {
        let reply = self.call(SpecOp::GetCompleteSpectrumData).await?;
        Self::check_acquired("complete spectrum data", reply.return_code())?;
        let values = reply.f64_array(npoints * nspect)?;
        if npoints == 0 {
            return Ok(vec![Vec::new(); nspect]);
        }
        Ok(values.chunks(npoints).map(<[f64]>::to_vec).collect())
    }

    /// Acquires one spectrum and returns its info and intensities.
    pub async fn spectrum(&mut self) -> Result<(SpectrumInfo, Vec<f64>), ClientError> {
        self.acquire().await?;
        let info = self.spectrum_info().await?;
        let data = self.spectrum_data(info.npoints as usize).await?;
        Ok((info, data))
    }
}
