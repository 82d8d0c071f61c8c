//! Spectrometer acquisition.
//!
//! ```text
//! Idle -> Acquiring -> InfoReady -> DataReady
//! ```

use super::expect_state;
use crate::connection::Transport;
use crate::error::ClientError;
use crate::spectrometer::SpectrometerClient;
use sara_protocol::spectrometer::{SpectrometerInfo, SpectrumInfo};
use serde::{Deserialize, Serialize};

/// Acquisition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumState {
    #[default]
    Idle,
    Acquiring,
    InfoReady,
    DataReady,
}

/// Acquire, then info, then data. Data is sized from the info, so it
/// cannot be fetched first.
pub struct SpectrumAcquisition<'a, S> {
    spec: &'a mut SpectrometerClient<S>,
    state: SpectrumState,
    info: Option<SpectrumInfo>,
}

impl<'a, S: Transport> SpectrumAcquisition<'a, S> {
    pub fn new(spec: &'a mut SpectrometerClient<S>) -> Self {
        Self {
            spec,
            state: SpectrumState::Idle,
            info: None,
        }
    }

    pub fn state(&self) -> SpectrumState {
        self.state
    }

    pub async fn acquire(&mut self) -> Result<(), ClientError> {
        self.spec.acquire().await?;
        self.info = None;
        self.state = SpectrumState::Acquiring;
        Ok(())
    }

    pub async fn info(&mut self) -> Result<SpectrumInfo, ClientError> {
        expect_state(
            "spectrum info",
            self.state,
            &[
                SpectrumState::Acquiring,
                SpectrumState::InfoReady,
                SpectrumState::DataReady,
            ],
        )?;
        let info = self.spec.spectrum_info().await?;
        self.info = Some(info.clone());
        self.state = SpectrumState::InfoReady;
        Ok(info)
    }

    pub async fn data(&mut self) -> Result<Vec<f64>, ClientError> {
        let npoints = match (&self.info, self.state) {
            (Some(info), SpectrumState::InfoReady | SpectrumState::DataReady) => {
                info.npoints as usize
            }
            _ => {
                return Err(ClientError::InvalidState(
                    "spectrum data requested before spectrum info".into(),
                ))
            }
        };
        let data = self.spec.spectrum_data(npoints).await?;
        self.state = SpectrumState::DataReady;
        Ok(data)
    }

    /// Spectrometer info and the wavelength of every pixel. Independent of
    /// the acquisition state.
    pub async fn wavelengths(&mut self) -> Result<(SpectrometerInfo, Vec<f64>), ClientError> {
        let info = self.spec.info().await?;
        let wavelengths = self.spec.wavelengths(info.npoints as usize).await?;
        Ok((info, wavelengths))
    }
}
