// Stanford PLY support for colored triangle meshes.
//
// Reading understands ASCII and both binary byte orders; writing always
// produces binary little-endian with double coordinates so that a saved
// mesh reloads bit-exactly.

use std::io::{BufRead, Read, Write};

use crate::mesh::{Color, Mesh};
use crate::misc::Point3;
use base::defs::{Error, ErrorKind::*, IntoResult, Result};

// Counts and indices are at most `uint` wide.
const MAX_INDEX: f64 = u32::MAX as f64;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Format {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(s: &str) -> Result<Scalar> {
        use Scalar::*;
        Ok(match s {
            "char" | "int8" => I8,
            "uchar" | "uint8" => U8,
            "short" | "int16" => I16,
            "ushort" | "uint16" => U16,
            "int" | "int32" => I32,
            "uint" | "uint32" => U32,
            "float" | "float32" => F32,
            "double" | "float64" => F64,
            _ => {
                let desc = format!("unknown PLY scalar type '{}'", s);
                return Err(Error::new(MalformedData, desc));
            }
        })
    }

    fn size(self) -> usize {
        use Scalar::*;
        match self {
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            F64 => 8,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Scalar::F32 | Scalar::F64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PropertyType {
    Scalar(Scalar),
    List { count: Scalar, item: Scalar },
}

#[derive(Clone, Debug, PartialEq)]
struct Property {
    name: String,
    r#type: PropertyType,
}

#[derive(Clone, Debug, PartialEq)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

impl Element {
    fn scalar_index(&self, name: &str) -> Option<(usize, Scalar)> {
        self.properties.iter().enumerate().find_map(|(i, p)| {
            match p.r#type {
                PropertyType::Scalar(s) if p.name == name => Some((i, s)),
                _ => None,
            }
        })
    }
}

#[derive(Debug)]
struct Header {
    format: Format,
    elements: Vec<Element>,
}

fn malformed<T>(desc: String) -> Result<T> {
    Err(Error::new(MalformedData, desc))
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<Header> {
    let mut line = String::new();
    let mut next_line = |line: &mut String| -> Result<bool> {
        line.clear();
        let n = reader
            .read_line(line)
            .res(|| "failed to read PLY header".to_string())?;
        Ok(n > 0)
    };

    if !next_line(&mut line)? || line.trim() != "ply" {
        return malformed("missing PLY magic".to_string());
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();

    loop {
        if !next_line(&mut line)? {
            return malformed("unexpected end of PLY header".to_string());
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["end_header"] => break,
            ["comment", ..] | ["obj_info", ..] | [] => (),
            ["format", f, _version] => {
                format = Some(match *f {
                    "ascii" => Format::Ascii,
                    "binary_little_endian" => Format::BinaryLittleEndian,
                    "binary_big_endian" => Format::BinaryBigEndian,
                    _ => {
                        let desc = format!("unknown PLY format '{}'", f);
                        return Err(Error::new(UnsupportedFeature, desc));
                    }
                });
            }
            ["element", name, count] => {
                let count = count.parse::<usize>().map_err(|_| {
                    let desc = format!("bad PLY element count '{}'", count);
                    Error::new(MalformedData, desc)
                })?;
                elements.push(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                let property = Property {
                    name: name.to_string(),
                    r#type: PropertyType::List {
                        count: Scalar::parse(count)?,
                        item: Scalar::parse(item)?,
                    },
                };
                match elements.last_mut() {
                    Some(element) => element.properties.push(property),
                    None => {
                        return malformed(format!(
                            "PLY property '{}' outside of element",
                            name
                        ))
                    }
                }
            }
            ["property", scalar, name] => {
                let property = Property {
                    name: name.to_string(),
                    r#type: PropertyType::Scalar(Scalar::parse(scalar)?),
                };
                match elements.last_mut() {
                    Some(element) => element.properties.push(property),
                    None => {
                        return malformed(format!(
                            "PLY property '{}' outside of element",
                            name
                        ))
                    }
                }
            }
            _ => {
                return malformed(format!(
                    "malformed PLY header line '{}'",
                    line.trim()
                ))
            }
        }
    }

    match format {
        Some(format) => Ok(Header { format, elements }),
        None => malformed("missing PLY format line".to_string()),
    }
}

struct BodyReader<R> {
    reader: R,
    format: Format,
    tokens: Vec<String>,
}

impl<R: BufRead> BodyReader<R> {
    fn next_token(&mut self) -> Result<String> {
        while self.tokens.is_empty() {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .res(|| "failed to read PLY data".to_string())?;
            if n == 0 {
                return malformed("unexpected end of PLY data".to_string());
            }
            self.tokens =
                line.split_whitespace().rev().map(String::from).collect();
        }
        Ok(self.tokens.pop().unwrap_or_default())
    }

    fn read_scalar(&mut self, scalar: Scalar) -> Result<f64> {
        let big = match self.format {
            Format::Ascii => {
                let token = self.next_token()?;
                return token.parse::<f64>().map_err(|_| {
                    let desc = format!("bad PLY value '{}'", token);
                    Error::new(MalformedData, desc)
                });
            }
            Format::BinaryLittleEndian => false,
            Format::BinaryBigEndian => true,
        };

        let mut buf = [0u8; 8];
        self.reader
            .read_exact(&mut buf[..scalar.size()])
            .res(|| "unexpected end of PLY data".to_string())?;

        macro_rules! decode {
            ($t:ty, $n:expr) => {{
                let mut bytes = [0u8; $n];
                bytes.copy_from_slice(&buf[..$n]);
                (if big {
                    <$t>::from_be_bytes(bytes)
                } else {
                    <$t>::from_le_bytes(bytes)
                }) as f64
            }};
        }

        use Scalar::*;
        Ok(match scalar {
            I8 => buf[0] as i8 as f64,
            U8 => buf[0] as f64,
            I16 => decode!(i16, 2),
            U16 => decode!(u16, 2),
            I32 => decode!(i32, 4),
            U32 => decode!(u32, 4),
            F32 => decode!(f32, 4),
            F64 => decode!(f64, 8),
        })
    }

    fn read_index(&mut self, scalar: Scalar) -> Result<usize> {
        let value = self.read_scalar(scalar)?;
        if value < 0.0 || value.fract() != 0.0 || value > MAX_INDEX {
            return malformed(format!("bad PLY index '{}'", value));
        }
        Ok(value as usize)
    }

    /// Reads one element row; list properties become multiple values.
    fn read_row(&mut self, element: &Element) -> Result<Vec<Vec<f64>>> {
        let mut row = Vec::with_capacity(element.properties.len());
        for property in &element.properties {
            match property.r#type {
                PropertyType::Scalar(s) => row.push(vec![self.read_scalar(s)?]),
                PropertyType::List { count, item } => {
                    let n = self.read_index(count)?;
                    let mut values = Vec::with_capacity(n.min(64));
                    for _ in 0..n {
                        values.push(self.read_scalar(item)?);
                    }
                    row.push(values);
                }
            }
        }
        Ok(row)
    }
}

fn color_channel(value: f64, scalar: Scalar) -> u8 {
    let value = if scalar.is_float() { value * 255.0 } else { value };
    value.round().clamp(0.0, 255.0) as u8
}

fn read_vertices<R: BufRead>(
    body: &mut BodyReader<R>,
    element: &Element,
    mesh: &mut Mesh,
) -> Result<()> {
    let coord = |name: &str| {
        element.scalar_index(name).ok_or_else(|| {
            let desc = format!("PLY vertices have no '{}' property", name);
            Error::new(MalformedData, desc)
        })
    };
    let (x, y, z) = (coord("x")?, coord("y")?, coord("z")?);
    let (r, g, b) = (coord("red")?, coord("green")?, coord("blue")?);

    for _ in 0..element.count {
        let row = body.read_row(element)?;
        mesh.vertices
            .push(Point3::new(row[x.0][0], row[y.0][0], row[z.0][0]));
        mesh.colors.push([
            color_channel(row[r.0][0], r.1),
            color_channel(row[g.0][0], g.1),
            color_channel(row[b.0][0], b.1),
        ]);
    }
    Ok(())
}

fn read_faces<R: BufRead>(
    body: &mut BodyReader<R>,
    element: &Element,
    mesh: &mut Mesh,
) -> Result<()> {
    let list = element
        .properties
        .iter()
        .position(|p| {
            matches!(p.r#type, PropertyType::List { .. })
                && (p.name == "vertex_indices" || p.name == "vertex_index")
        })
        .ok_or_else(|| {
            let desc = "PLY faces have no vertex index list".to_string();
            Error::new(MalformedData, desc)
        })?;

    for i in 0..element.count {
        let row = body.read_row(element)?;
        let polygon = &row[list];
        if polygon.len() < 3 {
            return malformed(format!("PLY face {} has < 3 vertices", i));
        }

        let mut indices = Vec::with_capacity(polygon.len());
        for &v in polygon {
            if v < 0.0 || v.fract() != 0.0 || v > MAX_INDEX {
                return malformed(format!("bad PLY vertex index '{}'", v));
            }
            indices.push(v as usize);
        }

        // Fan triangulation.
        for k in 1..indices.len() - 1 {
            mesh.faces.push([indices[0], indices[k], indices[k + 1]]);
        }
    }
    Ok(())
}

pub fn read_ply<R: BufRead>(mut reader: R) -> Result<Mesh> {
    let header = read_header(&mut reader)?;

    if !header.elements.iter().any(|e| e.name == "vertex") {
        return malformed("PLY has no vertex element".to_string());
    }

    let mut body = BodyReader {
        reader,
        format: header.format,
        tokens: Vec::new(),
    };
    let mut mesh = Mesh::default();

    for element in &header.elements {
        match element.name.as_str() {
            "vertex" => read_vertices(&mut body, element, &mut mesh)?,
            "face" => read_faces(&mut body, element, &mut mesh)?,
            _ => {
                for _ in 0..element.count {
                    body.read_row(element)?;
                }
            }
        }
    }

    Ok(mesh)
}

pub fn write_ply<W: Write>(mesh: &Mesh, mut writer: W) -> Result<()> {
    let write_err = || "failed to write PLY".to_string();

    write!(
        writer,
        concat!(
            "ply\n",
            "format binary_little_endian 1.0\n",
            "comment written by splatter\n",
            "element vertex {}\n",
            "property double x\n",
            "property double y\n",
            "property double z\n",
            "property uchar red\n",
            "property uchar green\n",
            "property uchar blue\n",
            "element face {}\n",
            "property list uchar int vertex_indices\n",
            "end_header\n",
        ),
        mesh.vertices.len(),
        mesh.faces.len()
    )
    .into_result(write_err)?;

    let default_color: Color = [0, 0, 0];
    for (i, v) in mesh.vertices.iter().enumerate() {
        let color = mesh.colors.get(i).unwrap_or(&default_color);
        let mut record = [0u8; 27];
        record[0..8].copy_from_slice(&v.x.to_le_bytes());
        record[8..16].copy_from_slice(&v.y.to_le_bytes());
        record[16..24].copy_from_slice(&v.z.to_le_bytes());
        record[24..27].copy_from_slice(color);
        writer.write_all(&record).into_result(write_err)?;
    }

    for face in &mesh.faces {
        let mut record = [3u8; 13];
        for (k, &v) in face.iter().enumerate() {
            let v = i32::try_from(v).map_err(|_| {
                let desc = format!("vertex index {} exceeds PLY int", v);
                Error::new(UnsupportedFeature, desc)
            })?;
            record[1 + k * 4..5 + k * 4].copy_from_slice(&v.to_le_bytes());
        }
        writer.write_all(&record).into_result(write_err)?;
    }

    writer.flush().into_result(write_err)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::mesh::tests::{five_vertex_mesh, grid_mesh};

    #[test]
    fn test_read_ascii() {
        let data = r#"ply
format ascii 1.0
comment exported elsewhere
element vertex 4
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
property uchar alpha
element face 1
property list uchar int vertex_indices
end_header
0 0 0 255 0 0 255
1 0 0 0 255 0 255
1 1 0 0 0 255 255
0 1 0.5 10 20 30 255
4 0 1 2 3
"#;
        let mesh = read_ply(Cursor::new(data)).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.vertices[3], Point3::new(0.0, 1.0, 0.5));
        assert_eq!(mesh.colors[3], [10, 20, 30]);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_read_float_colors() {
        let data = r#"ply
format ascii 1.0
element vertex 1
property double x
property double y
property double z
property float red
property float green
property float blue
end_header
1 2 3 1.0 0.5 0
"#;
        let mesh = read_ply(Cursor::new(data)).unwrap();
        assert_eq!(mesh.colors[0], [255, 128, 0]);
    }

    #[test]
    fn test_read_missing_colors() {
        let data = r#"ply
format ascii 1.0
element vertex 1
property float x
property float y
property float z
end_header
1 2 3
"#;
        let err = read_ply(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "PLY vertices have no 'red' property");
    }

    #[test]
    fn test_read_huge_list_count() {
        let data = r#"ply
format ascii 1.0
element vertex 3
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 1
property list uchar int vertex_indices
end_header
0 0 0 1 1 1
1 0 0 1 1 1
0 1 0 1 1 1
1e30 0 1 2
"#;
        let err = read_ply(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert!(err.description.starts_with("bad PLY index"));

        // A large but representable count runs out of data instead.
        let data = data.replace("1e30", "4000000000");
        let err = read_ply(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "unexpected end of PLY data");
    }

    #[test]
    fn test_read_bad_magic() {
        let err = read_ply(Cursor::new("obj\n")).unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "missing PLY magic");
    }

    #[test]
    fn test_read_truncated_binary() {
        let mut data = Vec::new();
        write_ply(&five_vertex_mesh(), &mut data).unwrap();
        data.truncate(data.len() - 5);
        let err = read_ply(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind, IoError);
    }

    #[test]
    fn test_reload_is_exact() {
        let mut mesh = grid_mesh(7).decimate(0.5);
        mesh.scale(0.1);

        let mut data = Vec::new();
        write_ply(&mesh, &mut data).unwrap();
        let reloaded = read_ply(Cursor::new(data.clone())).unwrap();
        assert_eq!(reloaded, mesh);

        let mut data2 = Vec::new();
        write_ply(&reloaded, &mut data2).unwrap();
        assert_eq!(data, data2);
    }

    #[test]
    fn test_read_big_endian() {
        let mut data = Vec::new();
        data.extend_from_slice(
            concat!(
                "ply\n",
                "format binary_big_endian 1.0\n",
                "element vertex 1\n",
                "property float x\n",
                "property float y\n",
                "property float z\n",
                "property uchar red\n",
                "property uchar green\n",
                "property uchar blue\n",
                "element edge 1\n",
                "property int vertex1\n",
                "property int vertex2\n",
                "end_header\n",
            )
            .as_bytes(),
        );
        for v in [1.5f32, -2.0, 0.25] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data.extend_from_slice(&[7, 8, 9]);
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());

        let mesh = read_ply(Cursor::new(data)).unwrap();
        assert_eq!(mesh.vertices, vec![Point3::new(1.5, -2.0, 0.25)]);
        assert_eq!(mesh.colors, vec![[7, 8, 9]]);
        assert!(mesh.faces.is_empty());
    }
}
