use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;
use render_protocol::{Color, RenderDomain, Viewport};
use tracing::warn;

use crate::{RenderBackend, RenderError};

/// Render service of one domain: a backend plus pass bookkeeping.
pub struct RenderService {
    domain: RenderDomain,
    backend: Box<dyn RenderBackend>,
    panels_rendered: u64,
}

impl RenderService {
    pub fn new(domain: RenderDomain, backend: Box<dyn RenderBackend>) -> Self {
        Self {
            domain,
            backend,
            panels_rendered: 0,
        }
    }

    pub fn domain(&self) -> RenderDomain {
        self.domain
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    pub fn panels_rendered(&self) -> u64 {
        self.panels_rendered
    }

    /// Resizes the canvas when it differs from the requested size.
    pub fn ensure_canvas(&mut self, width: u32, height: u32) {
        if self.backend.canvas_size() != (width, height) {
            self.backend.resize_canvas(width, height);
        }
    }

    /// Runs `draw` inside one panel pass. The pass is closed even when
    /// `draw` fails.
    pub fn render_panel<T>(
        &mut self,
        viewport: Viewport,
        clear: Option<Color>,
        draw: impl FnOnce(&mut dyn RenderBackend) -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        self.backend.begin_panel(viewport, clear)?;
        let result = draw(self.backend.as_mut());
        let ended = self.backend.end_panel();
        self.panels_rendered += 1;
        match (result, ended) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), ended) => {
                if let Err(end_err) = ended {
                    warn!(domain = ?self.domain, "panel pass did not close: {end_err}");
                }
                Err(err)
            }
            (Ok(_), Err(err)) => Err(err),
        }
    }

    pub fn read_region(&mut self, region: Viewport) -> Result<RgbaImage, RenderError> {
        self.backend.read_region(region)
    }
}

/// One render service per domain, handed to whoever renders.
pub struct RenderDomains {
    main: RenderService,
    preview: RenderService,
}

impl RenderDomains {
    pub fn new(main: Box<dyn RenderBackend>, preview: Box<dyn RenderBackend>) -> Self {
        Self {
            main: RenderService::new(RenderDomain::Main, main),
            preview: RenderService::new(RenderDomain::Preview, preview),
        }
    }

    pub fn get(&self, domain: RenderDomain) -> &RenderService {
        match domain {
            RenderDomain::Main => &self.main,
            RenderDomain::Preview => &self.preview,
        }
    }

    pub fn get_mut(&mut self, domain: RenderDomain) -> &mut RenderService {
        match domain {
            RenderDomain::Main => &mut self.main,
            RenderDomain::Preview => &mut self.preview,
        }
    }

    pub fn into_shared(self) -> SharedRenderService {
        SharedRenderService {
            main: Arc::new(Mutex::new(self.main)),
            preview: Arc::new(Mutex::new(self.preview)),
        }
    }
}

/// Render domains shared between threads, one lock per domain.
#[derive(Clone)]
pub struct SharedRenderService {
    main: Arc<Mutex<RenderService>>,
    preview: Arc<Mutex<RenderService>>,
}

impl SharedRenderService {
    pub fn lock(&self, domain: RenderDomain) -> MutexGuard<'_, RenderService> {
        let service = match domain {
            RenderDomain::Main => &self.main,
            RenderDomain::Preview => &self.preview,
        };
        service.lock().expect("render service lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoftwareBackend;

    fn domains() -> RenderDomains {
        RenderDomains::new(
            Box::new(SoftwareBackend::new(4, 4)),
            Box::new(SoftwareBackend::new(2, 2)),
        )
    }

    #[test]
    fn failed_draw_still_closes_the_pass() {
        let mut domains = domains();
        let service = domains.get_mut(RenderDomain::Main);
        let result: Result<(), _> =
            service.render_panel(Viewport::new(0, 0, 2, 2), None, |_| {
                Err(RenderError::EmptyViewport)
            });
        assert_eq!(result, Err(RenderError::EmptyViewport));
        service
            .render_panel(Viewport::new(0, 0, 2, 2), Some(Color::WHITE), |_| Ok(()))
            .expect("next pass can begin");
        assert_eq!(service.panels_rendered(), 2);
    }

    #[test]
    fn domains_own_separate_canvases() {
        let mut domains = domains();
        domains.get_mut(RenderDomain::Preview).ensure_canvas(8, 1);
        assert_eq!(domains.get(RenderDomain::Main).backend().canvas_size(), (4, 4));
        assert_eq!(
            domains.get(RenderDomain::Preview).backend().canvas_size(),
            (8, 1)
        );
    }

    #[test]
    fn shared_service_serialises_passes_per_domain() {
        let shared = domains().into_shared();
        std::thread::scope(|scope| {
            for domain in RenderDomain::ALL {
                let shared = shared.clone();
                scope.spawn(move || {
                    let mut service = shared.lock(domain);
                    service
                        .render_panel(Viewport::new(0, 0, 1, 1), Some(Color::WHITE), |_| Ok(()))
                        .unwrap();
                });
            }
        });
        for domain in RenderDomain::ALL {
            assert_eq!(shared.lock(domain).panels_rendered(), 1);
        }
    }
}
