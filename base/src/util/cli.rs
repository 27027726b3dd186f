use std::fmt::Debug;
use std::str::FromStr;

use arrayvec::ArrayVec;

use crate::defs::{Error, ErrorKind::*, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Array<T: FromStr, const N: usize>(pub [T; N]);

impl<T: Debug + Default + FromStr, const N: usize> FromStr for Array<T, N> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed_err = || {
            let desc = format!("malformed value array '{}'", s);
            Error::new(MalformedData, desc)
        };

        let parse = |iter: &mut std::str::Split<char>| {
            let part = iter.next().ok_or_else(malformed_err)?;
            if part.is_empty() {
                Ok(T::default())
            } else {
                part.trim().parse::<T>().map_err(|_| malformed_err())
            }
        };

        let mut iter = s.split(',');
        let mut vec = ArrayVec::<T, N>::new();

        for _ in 0..N {
            vec.push(parse(&mut iter)?);
        }

        if iter.next().is_some() {
            return Err(malformed_err());
        }

        vec.into_inner().map(Array).map_err(|_| malformed_err())
    }
}

impl<T: FromStr, const N: usize> From<[T; N]> for Array<T, N> {
    fn from(array: [T; N]) -> Self {
        Self(array)
    }
}

/// Parses an `#rrggbb` color.
pub fn parse_color(s: &str) -> Result<[u8; 3]> {
    let malformed_err = || {
        let desc = format!("malformed color '{}' (expected #rrggbb)", s);
        Error::new(MalformedData, desc)
    };

    let hex = s.strip_prefix('#').ok_or_else(malformed_err)?;
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(malformed_err());
    }

    let mut color = [0; 3];
    for (i, c) in color.iter_mut().enumerate() {
        *c = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| malformed_err())?;
    }
    Ok(color)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array() {
        let arr: Array<f64, 3> = "0,0.5,-3".parse().unwrap();
        assert_eq!(arr.0, [0.0, 0.5, -3.0]);

        let arr: Array<f64, 3> = ",1,".parse().unwrap();
        assert_eq!(arr.0, [0.0, 1.0, 0.0]);

        let err = "1,2".parse::<Array<f64, 3>>().unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "malformed value array '1,2'");

        assert!("1,2,3,4".parse::<Array<f64, 3>>().is_err());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff00ff").unwrap(), [255, 0, 255]);
        assert_eq!(parse_color("#0A0b0c").unwrap(), [10, 11, 12]);
        assert!(parse_color("ff00ff").is_err());
        assert!(parse_color("#ff00f").is_err());
        assert!(parse_color("#gg0000").is_err());
    }
}
