//! Readers and the factory that dispatches to them.
//!
//! Most callers should use [`ReaderFactory`] (from [`factory`]) which:
//!
//! - selects a reader from the source descriptor (or an explicit [`ReaderKind`] in [`ReaderOptions`])
//! - reads the source into an in-memory [`crate::types::Table`] (or a sheet map for workbooks)
//! - optionally reports success/failure/alerts to a [`ReadObserver`]
//!
//! Format-specific readers are also available under:
//! - [`csv`]
//! - [`excel`] (feature `excel`)
//! - [`json`]
//! - [`shapefile`]
//! - [`geopackage`]
//! - [`postgis`] (feature `postgis`)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod factory;
pub mod geopackage;
mod infer;
pub mod json;
pub mod observability;
#[cfg(feature = "postgis")]
pub mod postgis;
pub mod shapefile;
pub mod source;

pub use factory::{ReaderFactory, ReaderOptions};
pub use infer::normalize_column_name;
pub use observability::{
    CompositeObserver, FileObserver, LogObserver, ReadContext, ReadObserver, ReadSeverity, ReadStats,
};
pub use source::{ReaderKind, SourceDescriptor};

use crate::types::{Columns, ReaderData};

/// Common accessor contract of every reader.
///
/// Readers materialize their data when constructed; accessors never re-read the source.
pub trait DataReader {
    fn kind(&self) -> ReaderKind;

    /// The data read at construction.
    fn data(&self) -> &ReaderData;

    /// Take ownership of the data.
    fn into_data(self) -> ReaderData
    where
        Self: Sized;

    fn columns(&self) -> Columns {
        self.data().columns()
    }
}

/// One variant per supported reader.
#[derive(Debug)]
pub enum Reader {
    Csv(csv::CsvReader),
    #[cfg(feature = "excel")]
    Excel(excel::ExcelReader),
    GeoPackage(geopackage::GeoPackageReader),
    Json(json::JsonReader),
    #[cfg(feature = "postgis")]
    PostGis(postgis::PostGisReader),
    Shapefile(shapefile::ShapefileReader),
}

impl Reader {
    fn as_dyn(&self) -> &dyn DataReader {
        match self {
            Self::Csv(r) => r,
            #[cfg(feature = "excel")]
            Self::Excel(r) => r,
            Self::GeoPackage(r) => r,
            Self::Json(r) => r,
            #[cfg(feature = "postgis")]
            Self::PostGis(r) => r,
            Self::Shapefile(r) => r,
        }
    }

    #[cfg(feature = "excel")]
    pub fn as_excel(&self) -> Option<&excel::ExcelReader> {
        match self {
            Self::Excel(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_geopackage(&self) -> Option<&geopackage::GeoPackageReader> {
        match self {
            Self::GeoPackage(r) => Some(r),
            _ => None,
        }
    }
}

impl DataReader for Reader {
    fn kind(&self) -> ReaderKind {
        self.as_dyn().kind()
    }

    fn data(&self) -> &ReaderData {
        self.as_dyn().data()
    }

    fn into_data(self) -> ReaderData {
        match self {
            Self::Csv(r) => r.into_data(),
            #[cfg(feature = "excel")]
            Self::Excel(r) => r.into_data(),
            Self::GeoPackage(r) => r.into_data(),
            Self::Json(r) => r.into_data(),
            #[cfg(feature = "postgis")]
            Self::PostGis(r) => r.into_data(),
            Self::Shapefile(r) => r.into_data(),
        }
    }
}
