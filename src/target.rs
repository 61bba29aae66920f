// Target/hardware analysis
//
// This file is part of blend65c.
// Copyright (C) 2015 Jeffrey Sharp
//
// blend65c is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published
// by the Free Software Foundation, either version 3 of the License,
// or (at your option) any later version.
//
// blend65c is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See
// the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with blend65c.  If not, see <http://www.gnu.org/licenses/>.
//
// Per-platform hardware knowledge. Only the C64 has a real zero-page
// categorizer today; C128 and X16 are registered names with no categorizer
// yet, so `@zp` placements on those targets pass through unchecked rather
// than being rejected outright.

use crate::diagnostics::{code, DiagnosticBus};
use crate::error::ConfigError;
use crate::scope::SymbolTable;
use crate::source::Range;
use crate::symbol::StorageClass;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetKind {
    C64,
    C128,
    X16,
    Generic,
}

pub struct ZpRegion {
    pub start: u16,
    pub end: u16,
    pub reserved: bool,
}

/// C64 zero page: `$00`-`$01` is the 6510's I/O port, `$90`-`$FF` is KERNAL
/// workspace the OS ROM routines expect, leaving `$02`-`$8F` (142 bytes)
/// genuinely free for user allocation.
pub struct ZeroPageMap {
    regions: Vec<ZpRegion>,
}

impl ZeroPageMap {
    pub fn c64() -> Self {
        ZeroPageMap {
            regions: vec![
                ZpRegion { start: 0x00, end: 0x01, reserved: true },
                ZpRegion { start: 0x02, end: 0x8F, reserved: false },
                ZpRegion { start: 0x90, end: 0xFF, reserved: true },
            ],
        }
    }

    pub fn free_bytes(&self) -> u32 {
        self.regions.iter().filter(|r| !r.reserved).map(|r| r.end as u32 - r.start as u32 + 1).sum()
    }

    /// Reports `S102` if the allocation runs past the zero page, `S103` if
    /// it overlaps a reserved range.
    pub fn validate_allocation(&self, start: u16, size: u16, loc: &Range, bus: &mut DiagnosticBus) {
        if size == 0 {
            return;
        }
        let end = start as u32 + size as u32 - 1;
        if end > 0xFF {
            bus.error(
                code::S_ZP_OVERFLOW,
                format!("zero-page allocation at ${start:02X} of {size} byte(s) runs past $FF"),
                loc.clone(),
            );
            return;
        }
        for region in &self.regions {
            if region.reserved && start as u32 <= region.end as u32 && end >= region.start as u32 {
                bus.error(
                    code::S_ZP_RESERVED,
                    format!("${start:02X}..${end:02X} overlaps reserved zero-page range ${:02X}..${:02X}", region.start, region.end),
                    loc.clone(),
                );
                return;
            }
        }
    }

    /// Finds a free range of `size` bytes, preferring `preferred` if it
    /// already fits entirely within a free region. `None` if `size` is
    /// larger than every free region (and, in particular, always `None`
    /// past the categorizer's 142-byte free budget).
    pub fn suggest_allocation(&self, size: u16, preferred: Option<u16>) -> Option<u16> {
        if size == 0 {
            return None;
        }
        if let Some(pref) = preferred {
            let fits = self.regions.iter().any(|r| {
                !r.reserved && pref as u32 >= r.start as u32 && pref as u32 + size as u32 - 1 <= r.end as u32
            });
            if fits {
                return Some(pref);
            }
        }
        self.regions
            .iter()
            .filter(|r| !r.reserved)
            .find(|r| r.end as u32 - r.start as u32 + 1 >= size as u32)
            .map(|r| r.start)
    }
}

pub struct Target {
    pub kind: TargetKind,
    pub zero_page: Option<ZeroPageMap>,
}

impl Target {
    /// Parses a target name: `c64`, `c128`, `x16`, or `generic`; anything
    /// else is a configuration error.
    pub fn from_name(name: &str) -> Result<Target, ConfigError> {
        let kind = match name {
            "c64" => TargetKind::C64,
            "c128" => TargetKind::C128,
            "x16" => TargetKind::X16,
            "generic" => TargetKind::Generic,
            other => return Err(ConfigError::UnknownTarget(other.to_string())),
        };
        let zero_page = match kind {
            TargetKind::C64 => Some(ZeroPageMap::c64()),
            _ => None,
        };
        Ok(Target { kind, zero_page })
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            TargetKind::C64 => "c64",
            TargetKind::C128 => "c128",
            TargetKind::X16 => "x16",
            TargetKind::Generic => "generic",
        }
    }

    /// Validates every `@zp`-placed symbol against this target's hardware
    /// map. Targets with no categorizer accept `@zp` placements unchecked;
    /// `generic` has no zero page concept at all.
    #[tracing::instrument(skip_all, fields(target = self.name()))]
    pub fn analyze(&self, symbols: &SymbolTable, bus: &mut DiagnosticBus) {
        let Some(map) = &self.zero_page else {
            tracing::info!("no zero-page categorizer for this target; `@zp` placements are accepted without validation");
            return;
        };
        for sym in symbols.symbols_in_scope(symbols.root()) {
            if sym.storage_class != StorageClass::Zp {
                continue;
            }
            let size = sym.ty.size().unwrap_or(1) as u16;
            match sym.fixed_address {
                Some(addr) => map.validate_allocation(addr as u16, size, &sym.location, bus),
                None => {
                    if map.suggest_allocation(size, None).is_none() {
                        bus.error(
                            code::S_ZP_ALLOCATION,
                            format!("`{}` ({size} byte(s)) does not fit in any free zero-page region on {}", sym.name, self.name()),
                            sym.location.clone(),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_port_range_is_rejected() {
        let map = ZeroPageMap::c64();
        let mut bus = DiagnosticBus::new();
        map.validate_allocation(0x00, 1, &crate::source::Range::synthetic(std::rc::Rc::from("t.b65")), &mut bus);
        assert!(bus.all().iter().any(|d| d.code == code::S_ZP_RESERVED));
    }

    #[test]
    fn free_range_is_accepted() {
        let map = ZeroPageMap::c64();
        let mut bus = DiagnosticBus::new();
        map.validate_allocation(0x10, 2, &crate::source::Range::synthetic(std::rc::Rc::from("t.b65")), &mut bus);
        assert!(!bus.has_errors());
    }

    #[test]
    fn allocation_past_the_free_budget_has_no_suggestion() {
        let map = ZeroPageMap::c64();
        assert_eq!(map.free_bytes(), 142);
        assert!(map.suggest_allocation(200, None).is_none());
        assert!(map.suggest_allocation(10, None).is_some());
    }

    #[test]
    fn unknown_target_name_is_a_config_error() {
        assert!(Target::from_name("nes").is_err());
        assert!(Target::from_name("c64").is_ok());
    }

    #[test]
    fn c128_has_no_categorizer_yet() {
        let t = Target::from_name("c128").unwrap();
        assert!(t.zero_page.is_none());
    }
}
