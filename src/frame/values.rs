// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value lists borrowed from request PDUs

use super::*;
use crate::{error::*, util::*};

/// Register words of a write request, big-endian on the wire.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Data<'d> {
    pub(crate) data: RawData<'d>,
    pub(crate) quantity: usize,
}

impl<'d> Data<'d> {
    /// `data` must hold exactly `quantity` words.
    pub fn new(data: &'d [u8], quantity: usize) -> Result<Self, Error> {
        if data.len() != quantity * 2 {
            return Err(Error::LengthMismatch(data.len(), quantity * 2));
        }
        Ok(Self { data, quantity })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.quantity
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Word> {
        self.data
            .chunks_exact(2)
            .take(self.quantity)
            .nth(idx)
            .map(BigEndian::read_u16)
    }

    pub fn iter(self) -> impl Iterator<Item = Word> + 'd {
        self.data
            .chunks_exact(2)
            .take(self.quantity)
            .map(BigEndian::read_u16)
    }
}

/// Coil states of a write request, packed eight per byte.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coils<'c> {
    pub(crate) data: RawData<'c>,
    pub(crate) quantity: usize,
}

impl<'c> Coils<'c> {
    /// `data` must be exactly as long as `quantity` packed coils.
    pub fn new(data: &'c [u8], quantity: usize) -> Result<Self, Error> {
        let packed = packed_coils_len(quantity);
        if data.len() != packed {
            return Err(Error::LengthMismatch(data.len(), packed));
        }
        Ok(Self { data, quantity })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.quantity
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Coil> {
        (idx < self.quantity && idx / 8 < self.data.len()).then(|| read_bit(self.data, idx))
    }

    pub fn iter(self) -> impl Iterator<Item = Coil> + 'c {
        let quantity = self.quantity.min(self.data.len() * 8);
        (0..quantity).map(move |idx| read_bit(self.data, idx))
    }
}
