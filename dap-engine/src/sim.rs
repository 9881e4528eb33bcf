//! Simulated probe hardware.
//!
//! Every call into the simulated line and pins is recorded as an [`HwEvent`] so tests
//! can assert on the exact sequence of hardware operations. Failures are injected through
//! [`Faults`], which may be changed while the probe is in use via a [`FaultHandle`].
//! A [`SimTarget`] stands in for the target's debug port behind register transfers.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dap_protocol::{TransferRequest, dp};
use parking_lot::Mutex;

use crate::completion::WriteOperation;
use crate::error::HwError;
use crate::state::DebugPort;
use crate::transfer::{RegisterAccess, TransferContext, TransferError};
use crate::{ClockedLine, DapIo, DigitalPin, LineConfig, PinConfig};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resource {
    Line,
    Swdio,
    Tdo,
    NReset,
    Led,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HwEvent {
    LineConfig(LineConfig),
    LineWrite(Vec<u8>),
    PinConfig(Resource, PinConfig),
    PinWrite(Resource, bool),
}

/// Shared log of hardware events.
#[derive(Clone, Debug, Default)]
pub struct Recorder(Arc<Mutex<Vec<HwEvent>>>);

impl Recorder {
    pub fn push(&self, event: HwEvent) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.0.lock().clone()
    }

    /// Returns the recorded events and clears the log.
    pub fn take(&self) -> Vec<HwEvent> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn line_writes(&self) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                HwEvent::LineWrite(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Failures the simulated hardware injects.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Faults {
    pub fail_line_config: bool,
    pub fail_line_write: bool,
    /// Accept line writes but never complete them.
    pub stall_line_write: bool,
    /// Complete line writes from another thread after this delay.
    pub delay_line_write: Option<Duration>,
    pub fail_pin_config: Option<Resource>,
}

#[derive(Clone, Debug, Default)]
pub struct FaultHandle(Arc<Mutex<Faults>>);

impl FaultHandle {
    pub fn set(&self, faults: Faults) {
        *self.0.lock() = faults;
    }

    pub fn get(&self) -> Faults {
        *self.0.lock()
    }
}

#[derive(Debug)]
pub struct SimLine {
    recorder: Recorder,
    faults: FaultHandle,
}

impl ClockedLine for SimLine {
    fn set_config(&mut self, config: LineConfig) -> Result<(), HwError> {
        self.recorder.push(HwEvent::LineConfig(config));
        if self.faults.get().fail_line_config {
            return Err(HwError::Failed);
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8], op: &WriteOperation) -> Result<(), HwError> {
        self.recorder.push(HwEvent::LineWrite(data.to_vec()));
        let faults = self.faults.get();
        if faults.fail_line_write {
            return Err(HwError::Failed);
        }
        if faults.stall_line_write {
            return Ok(());
        }
        match faults.delay_line_write {
            Some(delay) => {
                let op = op.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    op.complete(true, Ok(()));
                });
            }
            None => op.complete(false, Ok(())),
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimPin {
    resource: Resource,
    level: bool,
    recorder: Recorder,
    faults: FaultHandle,
}

impl DigitalPin for SimPin {
    fn set_config(&mut self, config: PinConfig) -> Result<(), HwError> {
        self.recorder
            .push(HwEvent::PinConfig(self.resource, config));
        if self.faults.get().fail_pin_config == Some(self.resource) {
            return Err(HwError::Failed);
        }
        Ok(())
    }

    fn write(&mut self, high: bool) {
        self.recorder.push(HwEvent::PinWrite(self.resource, high));
        self.level = high;
    }

    fn read(&self) -> bool {
        self.level
    }
}

/// A complete set of simulated probe hardware.
#[derive(Debug)]
pub struct SimProbe {
    pub line: SimLine,
    pub swdio: SimPin,
    pub tdo: SimPin,
    pub nreset: SimPin,
    pub led: SimPin,
    recorder: Recorder,
    faults: FaultHandle,
}

impl Default for SimProbe {
    fn default() -> Self {
        SimProbe::new()
    }
}

impl SimProbe {
    pub fn new() -> SimProbe {
        SimProbe::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> SimProbe {
        let recorder = Recorder::default();
        let handle = FaultHandle::default();
        handle.set(faults);
        let pin = |resource| SimPin {
            resource,
            level: false,
            recorder: recorder.clone(),
            faults: handle.clone(),
        };
        SimProbe {
            line: SimLine {
                recorder: recorder.clone(),
                faults: handle.clone(),
            },
            swdio: pin(Resource::Swdio),
            tdo: pin(Resource::Tdo),
            nreset: pin(Resource::NReset),
            led: pin(Resource::Led),
            recorder,
            faults: handle,
        }
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    pub fn fault_handle(&self) -> FaultHandle {
        self.faults.clone()
    }

    /// Hardware resources without a status LED.
    pub fn io(&mut self) -> DapIo<'_> {
        DapIo::new(
            &mut self.line,
            &mut self.swdio,
            &mut self.tdo,
            &mut self.nreset,
        )
    }

    pub fn io_with_led(&mut self) -> DapIo<'_> {
        DapIo::new(
            &mut self.line,
            &mut self.swdio,
            &mut self.tdo,
            &mut self.nreset,
        )
        .with_status_led(&mut self.led)
    }
}

/// Default IDCODE of the simulated debug port (an ARM SW-DP).
pub const SIM_IDCODE: u32 = 0x2BA0_1477;

/// Register file of a simulated target.
///
/// DP registers are addressed by A3:A2, AP registers by the APBANKSEL field of DP SELECT
/// together with A3:A2.
#[derive(Clone, Debug)]
pub struct SimTarget {
    pub dp: [u32; 4],
    pub ap: [u32; 64],
    /// Number of WAIT acknowledges returned before the next access succeeds.
    pub wait_responses: u32,
    /// Answer every access with a FAULT.
    pub fault: bool,
    pub accesses: usize,
}

impl Default for SimTarget {
    fn default() -> Self {
        let mut dp = [0u32; 4];
        dp[usize::from(dp::IDCODE >> 2)] = SIM_IDCODE;
        SimTarget {
            dp,
            ap: [0; 64],
            wait_responses: 0,
            fault: false,
            accesses: 0,
        }
    }
}

impl SimTarget {
    fn ap_index(&self, request: TransferRequest) -> usize {
        let bank = (self.dp[usize::from(dp::SELECT >> 2)] >> 4) & 0x0F;
        (bank as usize) * 4 + usize::from(request.register() >> 2)
    }

    fn acknowledge(&mut self, cx: &TransferContext<'_>) -> Result<(), TransferError> {
        self.accesses += 1;
        if cx.port == DebugPort::Disabled {
            return Err(TransferError::NoTarget);
        }
        if self.wait_responses > 0 {
            self.wait_responses -= 1;
            return Err(TransferError::Wait);
        }
        if self.fault {
            return Err(TransferError::Fault);
        }
        Ok(())
    }
}

impl RegisterAccess for SimTarget {
    fn read(
        &mut self,
        cx: &TransferContext<'_>,
        request: TransferRequest,
    ) -> Result<u32, TransferError> {
        self.acknowledge(cx)?;
        if request.is_ap() {
            Ok(self.ap[self.ap_index(request)])
        } else {
            Ok(self.dp[usize::from(request.register() >> 2)])
        }
    }

    fn write(
        &mut self,
        cx: &TransferContext<'_>,
        request: TransferRequest,
        value: u32,
    ) -> Result<(), TransferError> {
        self.acknowledge(cx)?;
        if request.is_ap() {
            let index = self.ap_index(request);
            self.ap[index] = value;
        } else if request.register() != dp::ABORT {
            self.dp[usize::from(request.register() >> 2)] = value;
        }
        Ok(())
    }
}
