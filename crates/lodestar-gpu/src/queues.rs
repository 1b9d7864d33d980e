//! Queue family classification and role assignment.

use ash::vk;

use crate::catalog::QueueFamily;
use crate::requirements::QueueRoles;

/// What a single queue family can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyCapabilities {
    /// Queue family index
    pub index: u32,
    /// Supports graphics queues
    pub graphics: bool,
    /// Supports compute queues
    pub compute: bool,
    /// Graphics or compute capability implies transfer.
    pub transfer: bool,
    /// Can present to the bound surface
    pub present: bool,
}

impl FamilyCapabilities {
    pub fn from_family(family: &QueueFamily) -> Self {
        // A family without queues cannot serve any role.
        let usable = family.queue_count > 0;
        let graphics = usable && family.flags.contains(vk::QueueFlags::GRAPHICS);
        let compute = usable && family.flags.contains(vk::QueueFlags::COMPUTE);
        let transfer =
            usable && (graphics || compute || family.flags.contains(vk::QueueFlags::TRANSFER));

        Self {
            index: family.index,
            graphics,
            compute,
            transfer,
            present: usable && family.present,
        }
    }

    /// Transfer without graphics or compute.
    pub fn is_transfer_only(&self) -> bool {
        self.transfer && !self.graphics && !self.compute
    }

    /// Compute without graphics.
    pub fn is_compute_only(&self) -> bool {
        self.compute && !self.graphics
    }
}

/// Queue family index chosen for each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAssignment {
    /// Family for graphics work
    pub graphics: Option<u32>,
    /// Family for compute work
    pub compute: Option<u32>,
    /// Family for transfer work
    pub transfer: Option<u32>,
    /// Family that presents to the surface
    pub present: Option<u32>,
    /// Dedicated/separate modifiers the chosen indices achieve.
    pub modifiers: QueueRoles,
    /// Every family the assignment was made from
    pub families: Vec<FamilyCapabilities>,
}

impl QueueAssignment {
    /// Roles that received a family, plus the achieved modifiers.
    pub fn satisfied_roles(&self) -> QueueRoles {
        let mut roles = self.modifiers;
        roles.set(QueueRoles::GRAPHICS, self.graphics.is_some());
        roles.set(QueueRoles::COMPUTE, self.compute.is_some());
        roles.set(QueueRoles::TRANSFER, self.transfer.is_some());
        roles.set(QueueRoles::PRESENT, self.present.is_some());
        roles
    }

    /// Family index assigned to a single role flag.
    pub fn index(&self, role: QueueRoles) -> Option<u32> {
        match role {
            QueueRoles::GRAPHICS => self.graphics,
            QueueRoles::COMPUTE => self.compute,
            QueueRoles::TRANSFER => self.transfer,
            QueueRoles::PRESENT => self.present,
            _ => None,
        }
    }

    /// Distinct assigned family indices, in ascending order.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = [self.graphics, self.compute, self.transfer, self.present]
            .into_iter()
            .flatten()
            .collect();
        families.sort_unstable();
        families.dedup();
        families
    }

    fn capabilities(&self, index: u32) -> Option<&FamilyCapabilities> {
        self.families.iter().find(|family| family.index == index)
    }
}

fn first(
    families: &[FamilyCapabilities],
    pred: impl Fn(&FamilyCapabilities) -> bool,
) -> Option<u32> {
    families.iter().find(|family| pred(family)).map(|family| family.index)
}

/// Assign roles to queue families.
///
/// `wanted` carries the dedicated/separate modifiers to pursue; the returned
/// `modifiers` report which ones the assignment actually achieves.
pub fn classify(families: &[QueueFamily], wanted: QueueRoles) -> QueueAssignment {
    let families: Vec<FamilyCapabilities> =
        families.iter().map(FamilyCapabilities::from_family).collect();

    let graphics = first(&families, |f| f.graphics);

    let present = match graphics {
        Some(index) if families.iter().any(|f| f.index == index && f.present) => Some(index),
        _ => first(&families, |f| f.present),
    };

    let mut compute = None;
    if wanted.contains(QueueRoles::DEDICATED_COMPUTE) {
        compute = first(&families, |f| f.is_compute_only());
    }
    if compute.is_none()
        && wanted.intersects(QueueRoles::DEDICATED_COMPUTE | QueueRoles::SEPARATE_COMPUTE)
    {
        compute = first(&families, |f| f.compute && Some(f.index) != graphics);
    }
    let compute = compute.or_else(|| first(&families, |f| f.compute));

    let transfer = first(&families, |f| f.is_transfer_only())
        .or_else(|| first(&families, |f| f.is_compute_only()))
        .or_else(|| {
            if wanted.intersects(QueueRoles::DEDICATED_TRANSFER | QueueRoles::SEPARATE_TRANSFER) {
                first(&families, |f| f.transfer && Some(f.index) != graphics)
            } else {
                None
            }
        })
        .or(graphics)
        .or_else(|| first(&families, |f| f.transfer));

    let mut assignment = QueueAssignment {
        graphics,
        compute,
        transfer,
        present,
        modifiers: QueueRoles::empty(),
        families,
    };
    assignment.modifiers = derive_modifiers(&assignment);
    assignment
}

fn derive_modifiers(assignment: &QueueAssignment) -> QueueRoles {
    let mut modifiers = QueueRoles::empty();

    let separate = |index: Option<u32>| index.is_some() && index != assignment.graphics;
    let dedicated = |index: Option<u32>| {
        separate(index)
            && index
                .and_then(|i| assignment.capabilities(i))
                .is_some_and(|family| !family.graphics)
    };

    modifiers.set(QueueRoles::SEPARATE_COMPUTE, separate(assignment.compute));
    modifiers.set(QueueRoles::DEDICATED_COMPUTE, dedicated(assignment.compute));
    modifiers.set(QueueRoles::SEPARATE_TRANSFER, separate(assignment.transfer));
    modifiers.set(QueueRoles::DEDICATED_TRANSFER, dedicated(assignment.transfer));
    modifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    fn family(index: u32, flags: vk::QueueFlags) -> QueueFamily {
        QueueFamily::new(index, flags)
    }

    #[test]
    fn dedicated_compute_and_transfer_detected() {
        let families = [family(0, G | C | T), family(1, C), family(2, T)];
        let assignment = classify(&families, QueueRoles::DEDICATED_COMPUTE);

        assert_eq!(assignment.graphics, Some(0));
        assert_eq!(assignment.compute, Some(1));
        assert_eq!(assignment.transfer, Some(2));
        assert!(assignment.modifiers.contains(QueueRoles::DEDICATED_COMPUTE));
        assert!(assignment.modifiers.contains(QueueRoles::SEPARATE_COMPUTE));
        assert!(assignment.modifiers.contains(QueueRoles::DEDICATED_TRANSFER));
        assert!(assignment.modifiers.contains(QueueRoles::SEPARATE_TRANSFER));
    }

    #[test]
    fn compute_shares_graphics_unless_demanded() {
        let families = [family(0, G | C | T), family(1, C | T)];
        let assignment = classify(&families, QueueRoles::empty());

        assert_eq!(assignment.compute, Some(0));
        assert!(!assignment.modifiers.contains(QueueRoles::SEPARATE_COMPUTE));
        // Transfer still prefers the compute-only family.
        assert_eq!(assignment.transfer, Some(1));
        assert!(assignment.modifiers.contains(QueueRoles::DEDICATED_TRANSFER));
    }

    #[test]
    fn no_compute_family_means_no_compute_index() {
        let families = [family(0, G), family(1, T)];
        let assignment = classify(&families, QueueRoles::DEDICATED_COMPUTE);

        assert_eq!(assignment.compute, None);
        assert!(!assignment.satisfied_roles().contains(QueueRoles::COMPUTE));
        assert!(!assignment.modifiers.intersects(
            QueueRoles::DEDICATED_COMPUTE | QueueRoles::SEPARATE_COMPUTE
        ));
    }

    #[test]
    fn separate_without_dedicated() {
        // Two graphics-capable families: family 1 is separate but not dedicated.
        let families = [family(0, G | C | T), family(1, G | C | T)];
        let assignment = classify(&families, QueueRoles::SEPARATE_COMPUTE);

        assert_eq!(assignment.compute, Some(1));
        assert!(assignment.modifiers.contains(QueueRoles::SEPARATE_COMPUTE));
        assert!(!assignment.modifiers.contains(QueueRoles::DEDICATED_COMPUTE));

        let assignment = classify(&families, QueueRoles::DEDICATED_COMPUTE);
        assert_eq!(assignment.compute, Some(1));
        assert!(!assignment.modifiers.contains(QueueRoles::DEDICATED_COMPUTE));
    }

    #[test]
    fn separate_transfer_falls_back_to_other_family() {
        let families = [family(0, G | C | T), family(1, G | T)];
        assert_eq!(classify(&families, QueueRoles::empty()).transfer, Some(0));

        let assignment = classify(&families, QueueRoles::SEPARATE_TRANSFER);
        assert_eq!(assignment.transfer, Some(1));
        assert!(assignment.modifiers.contains(QueueRoles::SEPARATE_TRANSFER));
        assert!(!assignment.modifiers.contains(QueueRoles::DEDICATED_TRANSFER));
    }

    #[test]
    fn present_prefers_graphics_family() {
        let families = [
            family(0, C).with_present(true),
            family(1, G | C | T).with_present(true),
        ];
        assert_eq!(classify(&families, QueueRoles::empty()).present, Some(1));

        let families = [
            family(0, G | C | T),
            family(1, C).with_present(true),
        ];
        let assignment = classify(&families, QueueRoles::empty());
        assert_eq!(assignment.present, Some(1));
        assert_eq!(assignment.unique_families(), vec![0, 1]);
    }

    #[test]
    fn empty_family_is_ignored() {
        let families = [family(0, G | C | T).with_queue_count(0), family(1, G | T)];
        let assignment = classify(&families, QueueRoles::empty());
        assert_eq!(assignment.graphics, Some(1));
        assert_eq!(assignment.compute, None);
        assert_eq!(assignment.index(QueueRoles::TRANSFER), Some(1));
    }
}
