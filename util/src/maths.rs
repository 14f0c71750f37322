//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Num;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// Generic version of the std library function, which num is missing.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Num + PartialOrd + Copy,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs
    }
    else {
        r
    }
}

/// Wrap an angle in degrees into the range `[0, 360)`.
///
/// Works on both integer and float degree values, for example
/// `wrap_deg_360(-10) == 350` and `wrap_deg_360(730.5) == 10.5`.
pub fn wrap_deg_360<T>(angle_deg: T) -> T
where
    T: Num + PartialOrd + Copy + From<u16>,
{
    rem_euclid(angle_deg, T::from(360u16))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_deg_360() {
        assert_eq!(wrap_deg_360(-10), 350);
        assert_eq!(wrap_deg_360(730), 10);
        assert_eq!(wrap_deg_360(0), 0);
        assert_eq!(wrap_deg_360(360), 0);
        assert_eq!(wrap_deg_360(-360), 0);
        assert_eq!(wrap_deg_360(359), 359);

        assert_eq!(wrap_deg_360(-10.0), 350.0);
        assert_eq!(wrap_deg_360(730.5), 10.5);
        assert_eq!(wrap_deg_360(-200.0), 160.0);
    }

    #[test]
    fn test_wrap_deg_360_codomain() {
        for a in -1080..=1080 {
            let w = wrap_deg_360(a);
            assert!(w >= 0 && w < 360, "wrap_deg_360({}) = {}", a, w);
        }
    }
}
