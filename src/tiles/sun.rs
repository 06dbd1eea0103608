//! Subsolar point and day/night shading

use crate::constants::{SHADOW_FACTOR, TWILIGHT_DIAMETER};
use crate::core::config::SunConfig;
use crate::core::geo::GeoPoint;
use crate::tiles::image::{blue, green, red, rgb};

/// Seconds between the unix epoch and J2000.0 (2000-01-01 12:00 UTC)
const J2000_UNIX_SECS: f64 = 946_728_000.0;

/// Tracks where the sun stands overhead and how bright the ground is elsewhere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunLocator {
    lon: f64,
    lat: f64,
    show: bool,
    citylights: bool,
}

impl Default for SunLocator {
    fn default() -> Self {
        Self {
            lon: 0.0,
            lat: 0.0,
            show: false,
            citylights: false,
        }
    }
}

impl SunLocator {
    pub fn new(config: &SunConfig) -> Self {
        Self {
            show: config.show_shading,
            citylights: config.show_city_lights,
            ..Self::default()
        }
    }

    /// Subsolar point in radians
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lon, self.lat)
    }

    pub fn set_position(&mut self, position: GeoPoint) {
        self.lon = position.lon;
        self.lat = position.lat;
    }

    pub fn show(&self) -> bool {
        self.show
    }

    pub fn set_show(&mut self, show: bool) {
        self.show = show;
    }

    pub fn citylights(&self) -> bool {
        self.citylights
    }

    pub fn set_citylights(&mut self, citylights: bool) {
        self.citylights = citylights;
    }

    /// Moves the subsolar point to where it is at `unix_secs`
    ///
    /// Low precision solar ephemeris, good to a fraction of a degree.
    pub fn update_position(&mut self, unix_secs: f64) {
        let days = (unix_secs - J2000_UNIX_SECS) / 86_400.0;

        let mean_anomaly = (357.529 + 0.985_600_28 * days).rem_euclid(360.0).to_radians();
        let mean_longitude = (280.459 + 0.985_647_36 * days).rem_euclid(360.0);
        let ecliptic_longitude = (mean_longitude
            + 1.915 * mean_anomaly.sin()
            + 0.020 * (2.0 * mean_anomaly).sin())
        .to_radians();
        let obliquity = (23.439 - 0.000_000_36 * days).to_radians();

        let right_ascension = (obliquity.cos() * ecliptic_longitude.sin())
            .atan2(ecliptic_longitude.cos())
            .to_degrees();
        let declination = (obliquity.sin() * ecliptic_longitude.sin()).asin();

        // equation of time in degrees of hour angle
        let equation_of_time = (mean_longitude - right_ascension + 540.0).rem_euclid(360.0) - 180.0;
        let utc_hours = unix_secs.rem_euclid(86_400.0) / 3_600.0;
        let lon = 15.0 * (12.0 - utc_hours) - equation_of_time;

        self.lon = GeoPoint::normalize_lon(lon.to_radians());
        self.lat = declination;
    }

    /// Brightness in [0, 1] at a ground position given in radians
    pub fn shading(&self, lon: f64, lat: f64) -> f64 {
        let a = ((lat - self.lat) / 2.0).sin();
        let c = lat.cos() * self.lat.cos();
        self.shading_with(lon, a, c)
    }

    /// [`Self::shading`] with the latitude terms of the haversine precomputed for a row
    pub fn shading_with(&self, lon: f64, a: f64, c: f64) -> f64 {
        let b = ((lon - self.lon) / 2.0).sin();
        // 0 beneath the sun, 0.5 on the terminator, 1 on the far side
        let h = a * a + c * b * b;

        if h <= 0.5 - TWILIGHT_DIAMETER / 2.0 {
            1.0
        } else if h >= 0.5 + TWILIGHT_DIAMETER / 2.0 {
            0.0
        } else {
            (0.5 + TWILIGHT_DIAMETER / 2.0 - h) / TWILIGHT_DIAMETER
        }
    }

    /// Darkens a day pixel according to its brightness
    pub fn shade_pixel(&self, pixel: u32, brightness: f64) -> u32 {
        if brightness > 0.99999 {
            return pixel;
        }
        let d = if brightness < 0.00001 {
            SHADOW_FACTOR
        } else {
            brightness + SHADOW_FACTOR * (1.0 - brightness)
        };
        scale(pixel, d)
    }

    /// Replaces a day pixel by the night pixel, blending across twilight
    pub fn shade_pixel_composite(&self, day: u32, night: u32, brightness: f64) -> u32 {
        if brightness > 0.99999 {
            return day;
        }
        if brightness < 0.00001 {
            return night;
        }
        let d = brightness;
        let mix = |a: u32, b: u32| (a as f64 * d + b as f64 * (1.0 - d)) as u32;
        rgb(
            mix(red(day), red(night)),
            mix(green(day), green(night)),
            mix(blue(day), blue(night)),
        )
    }
}

fn scale(pixel: u32, factor: f64) -> u32 {
    let s = |v: u32| (v as f64 * factor) as u32;
    rgb(s(red(pixel)), s(green(pixel)), s(blue(pixel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_subsolar_point_at_solstices_and_equinox() {
        let mut sun = SunLocator::default();

        // 2021-06-21 12:00 UTC
        sun.update_position(1_624_276_800.0);
        assert!((sun.position().lat_degrees() - 23.44).abs() < 0.2);
        assert!(sun.position().lon_degrees().abs() < 1.0);

        // 2021-03-20 12:00 UTC
        sun.update_position(1_616_241_600.0);
        assert!(sun.position().lat_degrees().abs() < 0.5);
        assert!((sun.position().lon_degrees() - 1.85).abs() < 0.5);

        // 2021-12-21 12:00 UTC
        sun.update_position(1_640_088_000.0);
        assert!((sun.position().lat_degrees() + 23.44).abs() < 0.2);
    }

    #[test]
    fn test_shading_day_night_and_twilight() {
        let sun = SunLocator::default();
        assert_eq!(sun.shading(0.0, 0.0), 1.0);
        assert_eq!(sun.shading(PI, 0.0), 0.0);

        // on the terminator h = 0.5 exactly, halfway through twilight
        let twilight = sun.shading(PI / 2.0, 0.0);
        assert!((twilight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_shade_pixel() {
        let sun = SunLocator::default();
        let pixel = rgb(200, 100, 20);
        assert_eq!(sun.shade_pixel(pixel, 1.0), pixel);
        assert_eq!(sun.shade_pixel(pixel, 0.0), rgb(70, 35, 7));
        // d = 0.5 + 0.35 * 0.5 = 0.675
        assert_eq!(sun.shade_pixel(pixel, 0.5), rgb(135, 67, 13));
    }

    #[test]
    fn test_shade_pixel_composite() {
        let sun = SunLocator::default();
        let day = rgb(200, 200, 200);
        let night = rgb(0, 0, 100);
        assert_eq!(sun.shade_pixel_composite(day, night, 1.0), day);
        assert_eq!(sun.shade_pixel_composite(day, night, 0.0), night);
        assert_eq!(sun.shade_pixel_composite(day, night, 0.5), rgb(100, 100, 150));
    }

    #[test]
    fn test_new_reads_config_flags() {
        let sun = SunLocator::new(&SunConfig {
            show_shading: true,
            show_city_lights: true,
        });
        assert!(sun.show());
        assert!(sun.citylights());
    }
}
