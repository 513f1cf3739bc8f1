//! Storage fee processor
//!
//! Every observable persistence action (field transcription, stub
//! materialization, payload bytes moved to or from the store) is reported
//! here and debited from the helper. Exhaustion surfaces as the usual
//! out-of-energy interrupt at the reporting site.

use crate::config::EnergySchedule;
use crate::runtime::helper::Helper;
use crate::runtime::interrupt::Interrupt;

pub struct StorageFees<'a> {
    helper: &'a mut Helper,
    schedule: &'a EnergySchedule,
}

impl<'a> StorageFees<'a> {
    pub fn new(helper: &'a mut Helper, schedule: &'a EnergySchedule) -> Self {
        Self { helper, schedule }
    }

    pub fn on_field_read(&mut self) -> Result<(), Interrupt> {
        self.helper.charge(self.schedule.codec_field)
    }

    pub fn on_field_write(&mut self) -> Result<(), Interrupt> {
        self.helper.charge(self.schedule.codec_field)
    }

    pub fn on_stub_instantiation(&mut self) -> Result<(), Interrupt> {
        self.helper.charge(self.schedule.stub_instantiation)
    }

    pub fn on_store_read(&mut self, bytes: usize) -> Result<(), Interrupt> {
        self.helper.charge(
            self.schedule.storage_read_base
                + bytes as u64 * self.schedule.storage_read_per_byte,
        )
    }

    pub fn on_store_write(&mut self, bytes: usize) -> Result<(), Interrupt> {
        self.helper.charge(
            self.schedule.storage_write_base
                + bytes as u64 * self.schedule.storage_write_per_byte,
        )
    }
}
