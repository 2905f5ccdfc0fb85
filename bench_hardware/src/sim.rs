//! Simulated bench used when the real devices are unreachable.
//!
//! A single first-order thermal plant is shared by the simulated
//! thermo-hygrometer, flow controller and heater. The downstream sensor
//! settles towards `ambient + ΔT_ss` where
//!
//! ΔT_ss = k · duty · V² / (R · c_p · flow)
//!
//! which is exactly the relation the mass-flow estimator inverts, so a
//! simulated run reproduces the flow setpoint in its flow estimate.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bench_traits::{
    DeviceHandles, DeviceProvider, DeviceResult, DualReading, FlowController, Heater,
    ThermoHygrometer,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::HwError;

/// Flow below which the plant is treated as stagnant (SLM).
const STAGNANT_FLOW_SLM: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct SimParams {
    pub ambient_c: f64,
    pub humidity_pct: f64,
    /// Thermal time constant of the downstream sensor (s)
    pub time_constant_s: f64,
    /// Simulated time that passes per sensor read (s)
    pub step_s: f64,
    pub specific_heat_j_per_kg_k: f64,
    pub heater_resistance_ohm: f64,
    pub heater_voltage_v: f64,
    pub conversion_constant: f64,
    /// Full-scale value of the heater duty register
    pub duty_max_raw: u32,
    /// Upper bound on the simulated temperature rise (°C)
    pub max_rise_c: f64,
    /// Peak amplitude of uniform noise added to each temperature (°C)
    pub noise_c: f64,
    pub seed: u64,
    pub initial_flow_slm: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            ambient_c: 22.0,
            humidity_pct: 40.0,
            time_constant_s: 8.0,
            step_s: 0.2,
            specific_heat_j_per_kg_k: 1005.0,
            heater_resistance_ohm: 10.0,
            heater_voltage_v: 12.0,
            conversion_constant: 49_830.0,
            duty_max_raw: u32::from(u16::MAX),
            max_rise_c: 150.0,
            noise_c: 0.0,
            seed: 0x5eed,
            initial_flow_slm: 0.0,
        }
    }
}

#[derive(Debug)]
struct Plant {
    params: SimParams,
    delta_t: f64,
    duty: f64,
    flow_slm: f64,
    rng: StdRng,
}

impl Plant {
    fn steady_state_rise(&self) -> f64 {
        let p = &self.params;
        let flow = self.flow_slm.max(STAGNANT_FLOW_SLM);
        let rise = p.conversion_constant * self.duty * p.heater_voltage_v.powi(2)
            / (p.heater_resistance_ohm * p.specific_heat_j_per_kg_k * flow);
        if rise.is_finite() {
            rise.clamp(0.0, p.max_rise_c)
        } else {
            p.max_rise_c
        }
    }

    fn advance(&mut self) {
        let tau = self.params.time_constant_s.max(f64::EPSILON);
        let alpha = 1.0 - (-self.params.step_s / tau).exp();
        let target = self.steady_state_rise();
        self.delta_t += alpha * (target - self.delta_t);
    }

    fn noise(&mut self) -> f64 {
        let amp = self.params.noise_c;
        if amp > 0.0 {
            self.rng.random_range(-amp..=amp)
        } else {
            0.0
        }
    }
}

fn lock(plant: &Mutex<Plant>) -> Result<MutexGuard<'_, Plant>, HwError> {
    plant
        .lock()
        .map_err(|_| HwError::Protocol("simulated plant lock poisoned".into()))
}

/// Shared handle to the simulated plant; hands out device handles.
#[derive(Debug, Clone)]
pub struct SimulatedBench {
    plant: Arc<Mutex<Plant>>,
}

impl SimulatedBench {
    pub fn new(params: SimParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        let flow_slm = params.initial_flow_slm.max(0.0);
        Self {
            plant: Arc::new(Mutex::new(Plant {
                params,
                delta_t: 0.0,
                duty: 0.0,
                flow_slm,
                rng,
            })),
        }
    }

    /// Device handles backed by this plant.
    pub fn handles(&self) -> DeviceHandles {
        DeviceHandles {
            thermo: Box::new(SimulatedThermoHygrometer {
                plant: self.plant.clone(),
            }),
            flow: Box::new(SimulatedFlowController {
                plant: self.plant.clone(),
            }),
            heater: Box::new(SimulatedHeater {
                plant: self.plant.clone(),
            }),
        }
    }

    /// Current noiseless temperature rise of the downstream sensor.
    pub fn delta_t(&self) -> f64 {
        self.plant.lock().map(|p| p.delta_t).unwrap_or(0.0)
    }

    /// Heater duty (0..1) last written to the simulated heater.
    pub fn duty(&self) -> f64 {
        self.plant.lock().map(|p| p.duty).unwrap_or(0.0)
    }

    pub fn flow(&self) -> f64 {
        self.plant.lock().map(|p| p.flow_slm).unwrap_or(0.0)
    }
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

impl DeviceProvider for SimulatedBench {
    fn open_devices(&mut self) -> DeviceResult<DeviceHandles> {
        tracing::info!("opening simulated bench");
        Ok(self.handles())
    }
}

pub struct SimulatedThermoHygrometer {
    plant: Arc<Mutex<Plant>>,
}

impl ThermoHygrometer for SimulatedThermoHygrometer {
    fn read_dual(&mut self, _timeout: Duration) -> DeviceResult<DualReading> {
        let mut plant = lock(&self.plant)?;
        plant.advance();
        let ambient = plant.params.ambient_c;
        let humidity = plant.params.humidity_pct;
        let rise = plant.delta_t;
        let n1 = plant.noise();
        let n2 = plant.noise();
        let reading = DualReading {
            temperature_1: ambient + n1,
            humidity_1: humidity,
            temperature_2: ambient + rise + n2,
            // Warmer air holds the same water at a lower relative humidity.
            humidity_2: (humidity * (-0.06 * rise).exp()).clamp(0.0, 100.0),
        };
        tracing::trace!(t1 = reading.temperature_1, t2 = reading.temperature_2, "sim dual read");
        Ok(reading)
    }
}

pub struct SimulatedFlowController {
    plant: Arc<Mutex<Plant>>,
}

impl FlowController for SimulatedFlowController {
    fn read_flow(&mut self, _timeout: Duration) -> DeviceResult<f64> {
        Ok(lock(&self.plant)?.flow_slm)
    }

    fn set_flow(&mut self, slm: f64, _timeout: Duration) -> DeviceResult<()> {
        if !slm.is_finite() || slm < 0.0 {
            return Err(Box::new(HwError::Protocol(format!(
                "flow setpoint out of range: {slm}"
            ))));
        }
        lock(&self.plant)?.flow_slm = slm;
        tracing::debug!(slm, "sim flow setpoint");
        Ok(())
    }
}

pub struct SimulatedHeater {
    plant: Arc<Mutex<Plant>>,
}

impl Heater for SimulatedHeater {
    fn write_duty(&mut self, raw: u32, _timeout: Duration) -> DeviceResult<()> {
        let mut plant = lock(&self.plant)?;
        let max = plant.params.duty_max_raw.max(1);
        if raw > max {
            return Err(Box::new(HwError::Protocol(format!(
                "duty register overflow: {raw} > {max}"
            ))));
        }
        plant.duty = f64::from(raw) / f64::from(max);
        Ok(())
    }
}
