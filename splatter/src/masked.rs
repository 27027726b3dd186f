use crate::misc::Vector3;

/// A value that is either observed or carries no data at all.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Masked<T> {
    Observed(T),
    Unobserved,
}

impl<T> Masked<T> {
    pub fn is_observed(&self) -> bool {
        matches!(self, Masked::Observed(_))
    }

    pub fn observed(self) -> Option<T> {
        match self {
            Masked::Observed(value) => Some(value),
            Masked::Unobserved => None,
        }
    }
}

/// One color with a per-channel observed flag.
pub type MaskedColor = [Masked<f64>; 3];

/// Per-vertex masked colors, indexed like the mesh vertex buffer.
pub type MaskedColors = Vec<MaskedColor>;

pub const UNOBSERVED_COLOR: MaskedColor = [Masked::Unobserved; 3];

pub fn observed_color(color: Vector3) -> MaskedColor {
    [
        Masked::Observed(color[0]),
        Masked::Observed(color[1]),
        Masked::Observed(color[2]),
    ]
}

/// Returns the color when all of its channels are observed.
pub fn complete_color(color: &MaskedColor) -> Option<Vector3> {
    let [r, g, b] = *color;
    Some(Vector3::new(r.observed()?, g.observed()?, b.observed()?))
}

pub fn is_unobserved(color: &MaskedColor) -> bool {
    color.iter().all(|c| !c.is_observed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_color() {
        let color = observed_color(Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(complete_color(&color), Some(Vector3::zeros()));
        assert!(!is_unobserved(&color));

        let partial = [
            Masked::Observed(1.0),
            Masked::Unobserved,
            Masked::Observed(3.0),
        ];
        assert_eq!(complete_color(&partial), None);
        assert!(!is_unobserved(&partial));

        assert_eq!(complete_color(&UNOBSERVED_COLOR), None);
        assert!(is_unobserved(&UNOBSERVED_COLOR));
    }
}
