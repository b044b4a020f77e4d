//! Ritmo "humano" de la sesión: pausas y scrolls con jitter.
//!
//! Las pausas son inyectables: en tests se usa `Pacing::none()` y todo
//! corre sin esperar.

use rand::Rng;
use std::time::Duration;

/// Pausa aleatoria uniforme en `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl DelayPolicy {
    pub const ZERO: DelayPolicy = DelayPolicy {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub const fn millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub async fn pause(&self) {
        let d = self.sample();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

/// Rango de píxeles para un scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollRange {
    pub min: i64,
    pub max: i64,
}

impl ScrollRange {
    pub fn sample(&self) -> i64 {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Entre teclas al tipear la búsqueda.
    pub keystroke: DelayPolicy,
    /// Después de una acción (click, submit, cargar la home).
    pub settle: DelayPolicy,
    /// Lectura simulada después del scroll hacia abajo.
    pub dwell: DelayPolicy,
    /// Antes de reintentar tras una página de bloqueo.
    pub recovery: DelayPolicy,
    pub scroll_down: ScrollRange,
    pub scroll_up: ScrollRange,
}

impl Pacing {
    pub fn human() -> Self {
        Self {
            keystroke: DelayPolicy::millis(50, 150),
            settle: DelayPolicy::millis(300, 800),
            dwell: DelayPolicy::millis(3_000, 5_000),
            recovery: DelayPolicy::millis(0, 2_000),
            scroll_down: ScrollRange { min: 300, max: 800 },
            scroll_up: ScrollRange { min: 100, max: 300 },
        }
    }

    /// Sin pausas; los scrolls se siguen haciendo.
    pub fn none() -> Self {
        Self {
            keystroke: DelayPolicy::ZERO,
            settle: DelayPolicy::ZERO,
            dwell: DelayPolicy::ZERO,
            recovery: DelayPolicy::ZERO,
            ..Self::human()
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::human()
    }
}
