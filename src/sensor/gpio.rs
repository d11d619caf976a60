//! PIR sensor on a Raspberry Pi GPIO pin
//!
//! Pin access uses `rppal` behind the default `gpio` cargo feature. Without
//! it the driver still exists so the binaries build on non-Linux hosts, but
//! arming fails.

use super::{EdgeDriver, MotionEvent, SensorError};
#[cfg(feature = "gpio")]
use super::MotionKind;
use std::time::Duration;
use tokio::sync::mpsc;
#[cfg(feature = "gpio")]
use tracing::{debug, info};

/// Rising edge means motion started, falling edge means it stopped
pub struct PirMotionDriver {
    pin: u8,
    debounce: Option<Duration>,
    #[cfg(feature = "gpio")]
    input: Option<rppal::gpio::InputPin>,
}

impl PirMotionDriver {
    /// Driver for the BCM-numbered `pin`; `debounce_ms == 0` disables debouncing
    pub fn new(pin: u8, debounce_ms: u64) -> Self {
        Self {
            pin,
            debounce: (debounce_ms > 0).then(|| Duration::from_millis(debounce_ms)),
            #[cfg(feature = "gpio")]
            input: None,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn debounce(&self) -> Option<Duration> {
        self.debounce
    }
}

#[cfg(feature = "gpio")]
impl EdgeDriver for PirMotionDriver {
    fn arm(&mut self, edges: mpsc::UnboundedSender<MotionEvent>) -> Result<(), SensorError> {
        use rppal::gpio::{Event, Gpio, Trigger};

        if self.input.is_some() {
            return Err(SensorError::AlreadyArmed);
        }

        let pin = self.pin;
        let gpio_error = |e: rppal::gpio::Error| SensorError::Gpio {
            pin,
            reason: e.to_string(),
        };

        let mut input = Gpio::new()
            .map_err(gpio_error)?
            .get(pin)
            .map_err(gpio_error)?
            .into_input_pulldown();

        input
            .set_async_interrupt(Trigger::Both, self.debounce, move |event: Event| {
                let Some(kind) = kind_for_trigger(event.trigger) else {
                    return;
                };
                debug!(pin, ?kind, "PIR edge");
                let _ = edges.send(MotionEvent::now(kind));
            })
            .map_err(gpio_error)?;

        info!(pin, debounce = ?self.debounce, "PIR interrupt registered");
        self.input = Some(input);
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(mut input) = self.input.take() {
            let _ = input.clear_async_interrupt();
        }
    }
}

/// Rising edge is a detection, falling edge its end
#[cfg(feature = "gpio")]
fn kind_for_trigger(trigger: rppal::gpio::Trigger) -> Option<MotionKind> {
    use rppal::gpio::Trigger;

    match trigger {
        Trigger::RisingEdge => Some(MotionKind::Started),
        Trigger::FallingEdge => Some(MotionKind::Stopped),
        _ => None,
    }
}

#[cfg(not(feature = "gpio"))]
impl EdgeDriver for PirMotionDriver {
    fn arm(&mut self, _edges: mpsc::UnboundedSender<MotionEvent>) -> Result<(), SensorError> {
        Err(SensorError::Unsupported { pin: self.pin })
    }

    fn disarm(&mut self) {}
}
