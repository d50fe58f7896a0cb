use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use nalgebra::Matrix4;
use ndarray::Array3;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

pub type Affine = [[f64; 4]; 4];

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<f64>,
    pub voxel_size: [f64; 3],
    pub affine: Affine,
}

pub fn scaling_affine(voxel_size: [f64; 3], origin: [f64; 3]) -> Affine {
    [
        [voxel_size[0], 0.0, 0.0, origin[0]],
        [0.0, voxel_size[1], 0.0, origin[1]],
        [0.0, 0.0, voxel_size[2], origin[2]],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

impl Volume {
    pub fn new(data: Array3<f64>, affine: Affine) -> Self {
        let voxel_size = std::array::from_fn(|c| {
            (0..3).map(|r| affine[r][c].powi(2)).sum::<f64>().sqrt()
        });
        Self {
            data,
            voxel_size,
            affine,
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("load NIfTI {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let obj = if is_gzip(bytes) {
            InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
                .context("decode gzipped NIfTI")?
        } else {
            InMemNiftiObject::from_reader(Cursor::new(bytes)).context("decode NIfTI")?
        };
        let header = obj.header();
        if header.dim[0] < 3 {
            return Err(anyhow::anyhow!(
                "expected a 3D volume, got {}D",
                header.dim[0]
            ));
        }
        let affine = header_affine(header);
        let voxel_size = [
            f64::from(header.pixdim[1]).abs(),
            f64::from(header.pixdim[2]).abs(),
            f64::from(header.pixdim[3]).abs(),
        ];

        let array = obj
            .into_volume()
            .into_ndarray::<f64>()
            .context("convert NIfTI volume")?;
        let shape = array.shape().to_vec();
        if shape.len() < 3 {
            return Err(anyhow::anyhow!("expected a 3D array, got {}D", shape.len()));
        }
        let four_d = shape.len() >= 4;
        let data = Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
            if four_d {
                array[[i, j, k, 0]]
            } else {
                array[[i, j, k]]
            }
        });
        Ok(Self {
            data,
            voxel_size,
            affine,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = self.to_bytes();
        let bytes = if path.to_string_lossy().ends_with(".gz") {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish().context("gzip NIfTI")?
        } else {
            raw
        };
        fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (nx, ny, nz) = self.dims();
        let mut header = [0u8; 348];
        header[0..4].copy_from_slice(&348i32.to_le_bytes());

        let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
        for (i, d) in dim.iter().enumerate() {
            let offset = 40 + i * 2;
            header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
        }
        // FLOAT32
        header[70..72].copy_from_slice(&16i16.to_le_bytes());
        header[72..74].copy_from_slice(&32i16.to_le_bytes());

        let pixdim: [f32; 8] = [
            1.0,
            self.voxel_size[0] as f32,
            self.voxel_size[1] as f32,
            self.voxel_size[2] as f32,
            1.0,
            1.0,
            1.0,
            1.0,
        ];
        for (i, p) in pixdim.iter().enumerate() {
            let offset = 76 + i * 4;
            header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
        }
        header[108..112].copy_from_slice(&352.0f32.to_le_bytes());
        header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
        // millimetres
        header[123] = 2;
        header[254..256].copy_from_slice(&1i16.to_le_bytes());
        for (row, base) in [280usize, 296, 312].into_iter().enumerate() {
            for c in 0..4 {
                let offset = base + c * 4;
                header[offset..offset + 4]
                    .copy_from_slice(&(self.affine[row][c] as f32).to_le_bytes());
            }
        }
        header[344..348].copy_from_slice(b"n+1\0");

        let mut buffer = Vec::with_capacity(352 + nx * ny * nz * 4);
        buffer.extend_from_slice(&header);
        buffer.extend_from_slice(&[0u8; 4]);
        // x varies fastest on disk
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    buffer.extend_from_slice(&(self.data[[i, j, k]] as f32).to_le_bytes());
                }
            }
        }
        buffer
    }

    pub fn voxel_to_world(&self, ijk: [f64; 3]) -> [f64; 3] {
        apply_affine(&self.affine, ijk)
    }

    pub fn world_to_voxel(&self) -> Result<Affine> {
        invert_affine(&self.affine)
    }
}

pub fn apply_affine(affine: &Affine, p: [f64; 3]) -> [f64; 3] {
    std::array::from_fn(|r| {
        affine[r][0] * p[0] + affine[r][1] * p[1] + affine[r][2] * p[2] + affine[r][3]
    })
}

pub fn invert_affine(affine: &Affine) -> Result<Affine> {
    let m = Matrix4::from_fn(|r, c| affine[r][c]);
    let inv = m
        .try_inverse()
        .ok_or_else(|| anyhow::anyhow!("affine is not invertible"))?;
    Ok(std::array::from_fn(|r| std::array::from_fn(|c| inv[(r, c)])))
}

pub fn compose_affines(a: &Affine, b: &Affine) -> Affine {
    let ma = Matrix4::from_fn(|r, c| a[r][c]);
    let mb = Matrix4::from_fn(|r, c| b[r][c]);
    let m = ma * mb;
    std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn header_affine(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        std::array::from_fn(|r| {
            if r == 3 {
                [0.0, 0.0, 0.0, 1.0]
            } else {
                std::array::from_fn(|c| f64::from(rows[r][c]))
            }
        })
    } else {
        scaling_affine(
            [
                f64::from(header.pixdim[1]),
                f64::from(header.pixdim[2]),
                f64::from(header.pixdim[3]),
            ],
            [0.0, 0.0, 0.0],
        )
    }
}
