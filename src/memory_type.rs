//! Translate [`MemoryProperties`] into driver memory-type indices, buffer
//! usage flags, and block alignment.

use enumset::EnumSet;

use crate::driver::{
    BufferRequirements, BufferUsageFlag, BufferUsageFlags, DeviceLimits, MemoryPropertyFlag,
    MemoryPropertyFlags, MemoryType,
};
use crate::error::AllocError;
use crate::properties::{MemoryCaching, MemoryProperties, MemoryUsage, MemoryVisibility};

/// Mandatory and preferred property flags derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlagSelection {
    /// Flags a memory type must carry.
    pub need: MemoryPropertyFlags,
    /// Flags a memory type should carry.
    pub want: MemoryPropertyFlags,
}

/// Derive the needed and wanted property flags for the given properties.
///
/// Host-only requests require host visibility outright; a device-local type
/// can never satisfy them, so the flag is mandatory rather than preferred.
pub(crate) fn select_flags(properties: MemoryProperties) -> FlagSelection {
    let mut need = EnumSet::empty();
    let mut want = EnumSet::empty();

    match properties.visibility {
        MemoryVisibility::HostOnly => {
            need |= MemoryPropertyFlag::HostVisible;
        }
        MemoryVisibility::DeviceOnly => {
            need |= MemoryPropertyFlag::DeviceLocal;
        }
        MemoryVisibility::DeviceToHost => {
            need |= MemoryPropertyFlag::HostVisible;
            want |= MemoryPropertyFlag::DeviceLocal;
        }
        MemoryVisibility::HostToDevice => {
            need |= MemoryPropertyFlag::HostVisible;
        }
    }

    // Caching preferences only make sense for memory the host can reach.
    if need.contains(MemoryPropertyFlag::HostVisible) {
        match properties.caching {
            MemoryCaching::Cached => {
                want |= MemoryPropertyFlag::HostCached;
            }
            MemoryCaching::CachedCoherent => {
                want |= MemoryPropertyFlag::HostCached | MemoryPropertyFlag::HostCoherent;
            }
            MemoryCaching::UncachedCoherent => {
                want |= MemoryPropertyFlag::HostCoherent;
            }
            MemoryCaching::Uncached | MemoryCaching::Default => {}
        }
    }

    FlagSelection { need, want }
}

/// Pick the lowest-index memory type satisfying every needed and wanted
/// flag. There is no fallback pass that drops preferences.
pub(crate) fn select_memory_type(
    types: &[MemoryType],
    properties: MemoryProperties,
) -> Result<(u32, MemoryPropertyFlags), AllocError> {
    let selection = select_flags(properties);
    let required = selection.need | selection.want;

    types
        .iter()
        .enumerate()
        .find(|(_, ty)| ty.flags.is_superset(required))
        .map(|(index, ty)| (index as u32, ty.flags))
        .ok_or(AllocError::NoCompatibleMemoryType(properties))
}

/// Buffer usage flags implied by the requested usage.
pub(crate) fn buffer_usage_flags(usage: MemoryUsage) -> BufferUsageFlags {
    match usage {
        MemoryUsage::UniformStorage => BufferUsageFlag::UniformBuffer.into(),
        MemoryUsage::StaticStorage | MemoryUsage::DynamicStorage => {
            BufferUsageFlag::StorageBuffer.into()
        }
        MemoryUsage::TransferSrc => BufferUsageFlag::StorageBuffer | BufferUsageFlag::TransferSrc,
        MemoryUsage::TransferDst => BufferUsageFlag::StorageBuffer | BufferUsageFlag::TransferDst,
        MemoryUsage::TransferSrcDst => {
            BufferUsageFlag::StorageBuffer
                | BufferUsageFlag::TransferSrc
                | BufferUsageFlag::TransferDst
        }
    }
}

/// Alignment a block must honour for buffers of the given usage: the
/// buffer memory-requirement alignment, raised to the device's minimum
/// offset alignment for the binding kind.
pub(crate) fn block_alignment(
    limits: &DeviceLimits,
    requirements: BufferRequirements,
    usage: BufferUsageFlags,
) -> u64 {
    let offset_alignment = if usage.contains(BufferUsageFlag::StorageBuffer) {
        limits.min_storage_buffer_offset_alignment
    } else if usage.contains(BufferUsageFlag::UniformBuffer) {
        limits.min_uniform_buffer_offset_alignment
    } else {
        1
    };
    requirements.alignment.max(offset_alignment).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(visibility: MemoryVisibility, caching: MemoryCaching) -> MemoryProperties {
        MemoryProperties::new(visibility, caching, MemoryUsage::StaticStorage)
    }

    #[test]
    fn host_only_needs_host_visible() {
        let selection = select_flags(props(MemoryVisibility::HostOnly, MemoryCaching::Default));
        assert_eq!(selection.need, EnumSet::from(MemoryPropertyFlag::HostVisible));
        assert!(selection.want.is_empty());
    }

    #[test]
    fn device_to_host_prefers_device_local() {
        let selection = select_flags(props(MemoryVisibility::DeviceToHost, MemoryCaching::Default));
        assert_eq!(selection.need, EnumSet::from(MemoryPropertyFlag::HostVisible));
        assert_eq!(selection.want, EnumSet::from(MemoryPropertyFlag::DeviceLocal));
    }

    #[test]
    fn caching_preferences_require_host_visibility() {
        let selection = select_flags(props(MemoryVisibility::DeviceOnly, MemoryCaching::CachedCoherent));
        assert_eq!(selection.need, EnumSet::from(MemoryPropertyFlag::DeviceLocal));
        assert!(selection.want.is_empty());

        let selection = select_flags(props(MemoryVisibility::HostToDevice, MemoryCaching::CachedCoherent));
        assert_eq!(
            selection.want,
            MemoryPropertyFlag::HostCached | MemoryPropertyFlag::HostCoherent
        );
    }

    #[test]
    fn selects_lowest_index_match() {
        use MemoryPropertyFlag::*;
        let types = vec![
            MemoryType::new(DeviceLocal.into()),
            MemoryType::new(HostVisible | HostCoherent),
            MemoryType::new(HostVisible | HostCoherent | HostCached),
        ];
        let (index, _) = select_memory_type(
            &types,
            props(MemoryVisibility::HostToDevice, MemoryCaching::UncachedCoherent),
        )
        .unwrap();
        assert_eq!(index, 1);

        let (index, _) = select_memory_type(
            &types,
            props(MemoryVisibility::HostToDevice, MemoryCaching::Cached),
        )
        .unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn fails_without_relaxing_preferences() {
        use MemoryPropertyFlag::*;
        let types = vec![MemoryType::new(HostVisible | HostCoherent)];
        let result = select_memory_type(
            &types,
            props(MemoryVisibility::HostToDevice, MemoryCaching::Cached),
        );
        assert!(matches!(result, Err(AllocError::NoCompatibleMemoryType(_))));
    }

    #[test]
    fn usage_flag_table() {
        use BufferUsageFlag::*;
        assert_eq!(
            buffer_usage_flags(MemoryUsage::UniformStorage),
            EnumSet::from(UniformBuffer)
        );
        assert_eq!(
            buffer_usage_flags(MemoryUsage::DynamicStorage),
            EnumSet::from(StorageBuffer)
        );
        assert_eq!(
            buffer_usage_flags(MemoryUsage::TransferSrcDst),
            StorageBuffer | TransferSrc | TransferDst
        );
    }

    #[test]
    fn block_alignment_uses_binding_minimum() {
        let limits = DeviceLimits::new(256, 64);
        let requirements = BufferRequirements::new(16);
        assert_eq!(
            block_alignment(&limits, requirements, BufferUsageFlag::StorageBuffer.into()),
            64
        );
        assert_eq!(
            block_alignment(&limits, requirements, BufferUsageFlag::UniformBuffer.into()),
            256
        );
        let requirements = BufferRequirements::new(512);
        assert_eq!(
            block_alignment(&limits, requirements, BufferUsageFlag::StorageBuffer.into()),
            512
        );
    }
}
