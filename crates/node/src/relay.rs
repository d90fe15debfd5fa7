//! Solid-state relay output. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation tracks state and logs changes.

use anyhow::Result;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real relay (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct Relay {
    pin: OutputPin,
    active_low: bool, // many solid-state relay boards are active-low
    on: bool,
}

#[cfg(feature = "gpio")]
impl Relay {
    pub fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pin = gpio.get(gpio_pin)?.into_output();

        // Fail-safe: OFF at startup; persisted state is restored by main.
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }

        Ok(Self {
            pin,
            active_low,
            on: false,
        })
    }

    pub fn set(&mut self, on: bool) {
        let level_high = on != self.active_low;
        if level_high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.on = on;
        info!(on, "relay set");
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development — no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct Relay {
    on: bool,
}

#[cfg(not(feature = "gpio"))]
impl Relay {
    pub fn new(gpio_pin: u8, _active_low: bool) -> Result<Self> {
        info!(gpio_pin, "mock relay registered (not wired)");
        Ok(Self { on: false })
    }

    pub fn set(&mut self, on: bool) {
        self.on = on;
        info!(on, "mock relay set");
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

// ===========================================================================
// Tests
// ===========================================================================
