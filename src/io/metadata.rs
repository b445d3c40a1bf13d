use crate::types::{CfsiError, CfsiResult, GridGeometry, Resolution, TileMetadata};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Sentinel-2 tile metadata document (`metadata.xml` / `MTD_TL.xml`).
///
/// Element names are matched by local name, so `n1:General_Info` maps to
/// `General_Info`. Every field is optional here; required ones are checked
/// when the document is converted to [`TileMetadata`].
#[derive(Debug, Deserialize)]
pub struct TileDocument {
    #[serde(rename = "General_Info")]
    pub general_info: Option<GeneralInfo>,
    #[serde(rename = "Geometric_Info")]
    pub geometric_info: Option<GeometricInfo>,
    #[serde(rename = "Quality_Indicators_Info")]
    pub quality_indicators: Option<QualityIndicatorsInfo>,
}

/// Element text, ignoring attributes such as `metadataLevel` or `unit`
#[derive(Debug, Deserialize)]
pub struct Text<T> {
    #[serde(rename = "$text")]
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub struct GeneralInfo {
    #[serde(rename = "TILE_ID")]
    pub tile_id: Option<Text<String>>,
    #[serde(rename = "SENSING_TIME")]
    pub sensing_time: Option<Text<String>>,
}

#[derive(Debug, Deserialize)]
pub struct GeometricInfo {
    #[serde(rename = "Tile_Geocoding")]
    pub tile_geocoding: Option<TileGeocoding>,
    #[serde(rename = "Tile_Angles")]
    pub tile_angles: Option<TileAngles>,
}

#[derive(Debug, Deserialize)]
pub struct TileGeocoding {
    #[serde(rename = "HORIZONTAL_CS_CODE")]
    pub horizontal_cs_code: Option<String>,
    #[serde(rename = "Size", default)]
    pub sizes: Vec<Size>,
    #[serde(rename = "Geoposition", default)]
    pub geopositions: Vec<Geoposition>,
}

#[derive(Debug, Deserialize)]
pub struct Size {
    #[serde(rename = "@resolution")]
    pub resolution: u32,
    #[serde(rename = "NROWS")]
    pub nrows: usize,
    #[serde(rename = "NCOLS")]
    pub ncols: usize,
}

#[derive(Debug, Deserialize)]
pub struct Geoposition {
    #[serde(rename = "@resolution")]
    pub resolution: u32,
    #[serde(rename = "ULX")]
    pub ulx: f64,
    #[serde(rename = "ULY")]
    pub uly: f64,
    #[serde(rename = "XDIM")]
    pub xdim: f64,
    #[serde(rename = "YDIM")]
    pub ydim: f64,
}

#[derive(Debug, Deserialize)]
pub struct TileAngles {
    #[serde(rename = "Mean_Sun_Angle")]
    pub mean_sun_angle: Option<SunAngle>,
}

#[derive(Debug, Deserialize)]
pub struct SunAngle {
    #[serde(rename = "ZENITH_ANGLE")]
    pub zenith: Option<Text<f64>>,
    #[serde(rename = "AZIMUTH_ANGLE")]
    pub azimuth: Option<Text<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct QualityIndicatorsInfo {
    #[serde(rename = "Image_Content_QI")]
    pub image_content: Option<ImageContentQi>,
}

#[derive(Debug, Deserialize)]
pub struct ImageContentQi {
    #[serde(rename = "CLOUDY_PIXEL_PERCENTAGE")]
    pub cloudy_pixel_percentage: Option<f64>,
}

fn required<'a, T>(value: Option<&'a T>, path: &str) -> CfsiResult<&'a T> {
    value.ok_or_else(|| CfsiError::MissingField(path.to_string()))
}

/// Parser for Sentinel-2 tile metadata XML
pub struct TileMetadataParser;

impl TileMetadataParser {
    pub fn parse(xml_content: &str) -> CfsiResult<TileMetadata> {
        let document = from_str::<TileDocument>(xml_content)
            .map_err(|e| CfsiError::XmlParsing(format!("Failed to parse tile metadata XML: {}", e)))?;
        Self::from_document(&document)
    }

    pub fn from_document(document: &TileDocument) -> CfsiResult<TileMetadata> {
        let general = required(document.general_info.as_ref(), "General_Info")?;
        let tile_id = required(general.tile_id.as_ref(), "General_Info/TILE_ID")?
            .value
            .trim()
            .to_string();
        let sensing_time = required(general.sensing_time.as_ref(), "General_Info/SENSING_TIME")?
            .value
            .trim()
            .to_string();
        let sensing_time_utc = Self::parse_time(&sensing_time)?;

        let geometric = required(document.geometric_info.as_ref(), "Geometric_Info")?;
        let geocoding = required(geometric.tile_geocoding.as_ref(), "Geometric_Info/Tile_Geocoding")?;
        let crs_code = required(
            geocoding.horizontal_cs_code.as_ref(),
            "Geometric_Info/Tile_Geocoding/HORIZONTAL_CS_CODE",
        )?
        .trim()
        .to_lowercase();

        let mut grids = BTreeMap::new();
        for resolution in Resolution::ALL {
            grids.insert(resolution, Self::extract_grid(geocoding, resolution)?);
        }

        let angles = required(geometric.tile_angles.as_ref(), "Geometric_Info/Tile_Angles")?;
        let sun = required(
            angles.mean_sun_angle.as_ref(),
            "Geometric_Info/Tile_Angles/Mean_Sun_Angle",
        )?;
        let mean_sun_zenith = required(
            sun.zenith.as_ref(),
            "Geometric_Info/Tile_Angles/Mean_Sun_Angle/ZENITH_ANGLE",
        )?
        .value;
        let mean_sun_azimuth = required(
            sun.azimuth.as_ref(),
            "Geometric_Info/Tile_Angles/Mean_Sun_Angle/AZIMUTH_ANGLE",
        )?
        .value;

        let quality = required(document.quality_indicators.as_ref(), "Quality_Indicators_Info")?;
        let image_content = required(
            quality.image_content.as_ref(),
            "Quality_Indicators_Info/Image_Content_QI",
        )?;
        let cloudy_pixel_percentage = *required(
            image_content.cloudy_pixel_percentage.as_ref(),
            "Quality_Indicators_Info/Image_Content_QI/CLOUDY_PIXEL_PERCENTAGE",
        )?;

        log::debug!(
            "Parsed tile {} ({}), sensed {}, {}% cloudy",
            tile_id,
            crs_code,
            sensing_time,
            cloudy_pixel_percentage
        );

        Ok(TileMetadata {
            tile_id,
            sensing_time,
            sensing_time_utc,
            crs_code,
            grids,
            mean_sun_zenith,
            mean_sun_azimuth,
            cloudy_pixel_percentage,
        })
    }

    fn extract_grid(geocoding: &TileGeocoding, resolution: Resolution) -> CfsiResult<GridGeometry> {
        let res = resolution.meters();
        let size = geocoding
            .sizes
            .iter()
            .find(|s| s.resolution == res)
            .ok_or_else(|| CfsiError::MissingField(format!("Tile_Geocoding/Size[@resolution='{}']", res)))?;
        let geo = geocoding
            .geopositions
            .iter()
            .find(|g| g.resolution == res)
            .ok_or_else(|| {
                CfsiError::MissingField(format!("Tile_Geocoding/Geoposition[@resolution='{}']", res))
            })?;

        Ok(GridGeometry {
            nrows: size.nrows,
            ncols: size.ncols,
            ulx: geo.ulx,
            uly: geo.uly,
            xdim: geo.xdim,
            ydim: geo.ydim,
        })
    }

    fn parse_time(time_str: &str) -> CfsiResult<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(time_str) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(time_str.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| CfsiError::Metadata(format!("Invalid sensing time '{}': {}", time_str, e)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_TILE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:General_Info>
    <TILE_ID metadataLevel="Brief">S2A_OPER_MSI_L1C_TL_SGS__20201005T100723_A027596_T35PPM_N02.09</TILE_ID>
    <SENSING_TIME metadataLevel="Standard">2020-10-05T08:31:42.123Z</SENSING_TIME>
  </n1:General_Info>
  <n1:Geometric_Info>
    <Tile_Geocoding metadataLevel="Brief">
      <HORIZONTAL_CS_NAME>WGS84 / UTM zone 35N</HORIZONTAL_CS_NAME>
      <HORIZONTAL_CS_CODE>EPSG:32635</HORIZONTAL_CS_CODE>
      <Size resolution="10"><NROWS>10980</NROWS><NCOLS>10980</NCOLS></Size>
      <Size resolution="20"><NROWS>5490</NROWS><NCOLS>5490</NCOLS></Size>
      <Size resolution="60"><NROWS>1830</NROWS><NCOLS>1830</NCOLS></Size>
      <Geoposition resolution="10"><ULX>600000</ULX><ULY>1300020</ULY><XDIM>10</XDIM><YDIM>-10</YDIM></Geoposition>
      <Geoposition resolution="20"><ULX>600000</ULX><ULY>1300020</ULY><XDIM>20</XDIM><YDIM>-20</YDIM></Geoposition>
      <Geoposition resolution="60"><ULX>600000</ULX><ULY>1300020</ULY><XDIM>60</XDIM><YDIM>-60</YDIM></Geoposition>
    </Tile_Geocoding>
    <Tile_Angles metadataLevel="Standard">
      <Mean_Sun_Angle>
        <ZENITH_ANGLE unit="deg">25.4</ZENITH_ANGLE>
        <AZIMUTH_ANGLE unit="deg">120.8</AZIMUTH_ANGLE>
      </Mean_Sun_Angle>
    </Tile_Angles>
  </n1:Geometric_Info>
  <n1:Quality_Indicators_Info metadataLevel="Standard">
    <Image_Content_QI>
      <CLOUDY_PIXEL_PERCENTAGE>12.5</CLOUDY_PIXEL_PERCENTAGE>
      <DEGRADED_MSI_DATA_PERCENTAGE>0</DEGRADED_MSI_DATA_PERCENTAGE>
    </Image_Content_QI>
  </n1:Quality_Indicators_Info>
</n1:Level-1C_Tile_ID>"#;

    #[test]
    fn test_parse_tile_metadata() {
        let metadata = TileMetadataParser::parse(SAMPLE_TILE_XML).unwrap();

        assert!(metadata.tile_id.starts_with("S2A_OPER_MSI_L1C_TL"));
        assert_eq!(metadata.crs_code, "epsg:32635");
        assert_eq!(metadata.sensing_time, "2020-10-05T08:31:42.123Z");
        assert_eq!(metadata.platform(), Some("SENTINEL-2A"));
        assert_eq!(metadata.cloudy_pixel_percentage, 12.5);
        assert_eq!(metadata.mean_sun_azimuth, 120.8);

        let grid_20 = metadata.grid(Resolution::R20m).unwrap();
        assert_eq!(grid_20.nrows, 5490);
        assert_eq!(grid_20.xdim, 20.0);
        assert_eq!(grid_20.ydim, -20.0);
    }

    #[test]
    fn test_missing_resolution_grid() {
        let xml = SAMPLE_TILE_XML.replace(
            "<Size resolution=\"60\"><NROWS>1830</NROWS><NCOLS>1830</NCOLS></Size>",
            "",
        );
        match TileMetadataParser::parse(&xml) {
            Err(CfsiError::MissingField(path)) => assert!(path.contains("Size[@resolution='60']")),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_field() {
        let xml = SAMPLE_TILE_XML.replace("<SENSING_TIME metadataLevel=\"Standard\">2020-10-05T08:31:42.123Z</SENSING_TIME>", "");
        match TileMetadataParser::parse(&xml) {
            Err(CfsiError::MissingField(path)) => assert_eq!(path, "General_Info/SENSING_TIME"),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_section() {
        match TileMetadataParser::parse("<n1:Level-1C_Tile_ID></n1:Level-1C_Tile_ID>") {
            Err(CfsiError::MissingField(path)) => assert_eq!(path, "General_Info"),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            TileMetadataParser::parse("<a><b></a>"),
            Err(CfsiError::XmlParsing(_))
        ));
    }
}
