use serde_json::{Number, Value};

use crate::error::BridgeError;

/// Base dimension order used for SI strings: kg m s A K mol cd.
const BASE_SYMBOLS: [&str; 7] = ["kg", "m", "s", "A", "K", "mol", "cd"];

type Dims = [i8; 7];

const MASS: Dims = [1, 0, 0, 0, 0, 0, 0];
const LENGTH: Dims = [0, 1, 0, 0, 0, 0, 0];
const TIME: Dims = [0, 0, 1, 0, 0, 0, 0];
const CURRENT: Dims = [0, 0, 0, 1, 0, 0, 0];
const TEMPERATURE: Dims = [0, 0, 0, 0, 1, 0, 0];
const AMOUNT: Dims = [0, 0, 0, 0, 0, 1, 0];
const LUMINOSITY: Dims = [0, 0, 0, 0, 0, 0, 1];
const FREQUENCY: Dims = [0, 0, -1, 0, 0, 0, 0];
const FORCE: Dims = [1, 1, -2, 0, 0, 0, 0];
const PRESSURE: Dims = [1, -1, -2, 0, 0, 0, 0];
const ENERGY: Dims = [1, 2, -2, 0, 0, 0, 0];
const POWER: Dims = [1, 2, -3, 0, 0, 0, 0];
const CHARGE: Dims = [0, 0, 1, 1, 0, 0, 0];
const VOLTAGE: Dims = [1, 2, -3, -1, 0, 0, 0];
const MAGNETIC_FLUX_DENSITY: Dims = [1, 0, -2, -1, 0, 0, 0];
const VOLUME: Dims = [0, 3, 0, 0, 0, 0, 0];

/// Decimal scale kept as mantissa and power of ten so prefix arithmetic stays exact.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scale {
    mantissa: f64,
    exp10: i32,
}

impl Scale {
    const ONE: Scale = Scale {
        mantissa: 1.0,
        exp10: 0,
    };

    const fn new(mantissa: f64, exp10: i32) -> Self {
        Self { mantissa, exp10 }
    }

    fn times(self, other: Scale) -> Scale {
        Scale::new(self.mantissa * other.mantissa, self.exp10 + other.exp10)
    }

    fn powi(self, power: i32) -> Scale {
        Scale::new(self.mantissa.powi(power), self.exp10 * power)
    }

    fn apply(self, value: f64) -> f64 {
        shift(value * self.mantissa, self.exp10)
    }

    fn unapply(self, value: f64) -> f64 {
        shift(value, -self.exp10) / self.mantissa
    }
}

fn shift(value: f64, exp10: i32) -> f64 {
    let factor = 10f64.powi(exp10.abs());
    if exp10 >= 0 {
        value * factor
    } else {
        value / factor
    }
}

struct UnitDef {
    symbol: &'static str,
    aliases: &'static [&'static str],
    names: &'static [&'static str],
    dims: Dims,
    scale: Scale,
    offset: f64,
    prefixable: bool,
}

const fn unit(
    symbol: &'static str,
    names: &'static [&'static str],
    dims: Dims,
    scale: Scale,
) -> UnitDef {
    UnitDef {
        symbol,
        aliases: &[],
        names,
        dims,
        scale,
        offset: 0.0,
        prefixable: true,
    }
}

static UNITS: &[UnitDef] = &[
    unit("m", &["meter", "metre"], LENGTH, Scale::ONE),
    unit("g", &["gram", "gramme"], MASS, Scale::new(1.0, -3)),
    unit("s", &["second"], TIME, Scale::ONE),
    unit("A", &["ampere", "amp"], CURRENT, Scale::ONE),
    unit("K", &["kelvin"], TEMPERATURE, Scale::ONE),
    unit("mol", &["mole"], AMOUNT, Scale::ONE),
    unit("cd", &["candela"], LUMINOSITY, Scale::ONE),
    unit("Hz", &["hertz"], FREQUENCY, Scale::ONE),
    unit("N", &["newton"], FORCE, Scale::ONE),
    unit("Pa", &["pascal"], PRESSURE, Scale::ONE),
    unit("bar", &["bar"], PRESSURE, Scale::new(1.0, 5)),
    unit("J", &["joule"], ENERGY, Scale::ONE),
    unit("eV", &["electronvolt"], ENERGY, Scale::new(1.602176634, -19)),
    unit("W", &["watt"], POWER, Scale::ONE),
    unit("C", &["coulomb"], CHARGE, Scale::ONE),
    unit("V", &["volt"], VOLTAGE, Scale::ONE),
    unit("T", &["tesla"], MAGNETIC_FLUX_DENSITY, Scale::ONE),
    unit("L", &["liter", "litre"], VOLUME, Scale::new(1.0, -3)),
    UnitDef {
        symbol: "Å",
        aliases: &["\u{212B}", "A°"],
        names: &["angstrom"],
        dims: LENGTH,
        scale: Scale::new(1.0, -10),
        offset: 0.0,
        prefixable: false,
    },
    UnitDef {
        symbol: "min",
        aliases: &[],
        names: &["minute"],
        dims: TIME,
        scale: Scale::new(6.0, 1),
        offset: 0.0,
        prefixable: false,
    },
    UnitDef {
        symbol: "h",
        aliases: &["hr"],
        names: &["hour"],
        dims: TIME,
        scale: Scale::new(3.6, 3),
        offset: 0.0,
        prefixable: false,
    },
    UnitDef {
        symbol: "degC",
        aliases: &["°C", "C°"],
        names: &["celsius"],
        dims: TEMPERATURE,
        scale: Scale::ONE,
        offset: 273.15,
        prefixable: false,
    },
    UnitDef {
        symbol: "degF",
        aliases: &["°F", "F°"],
        names: &["fahrenheit"],
        dims: TEMPERATURE,
        scale: Scale::new(5.0 / 9.0, 0),
        offset: 459.67,
        prefixable: false,
    },
];

struct Prefix {
    symbol: &'static str,
    name: &'static str,
    exp10: i32,
}

const fn prefix(symbol: &'static str, name: &'static str, exp10: i32) -> Prefix {
    Prefix {
        symbol,
        name,
        exp10,
    }
}

static PREFIXES: &[Prefix] = &[
    prefix("da", "deca", 1),
    prefix("Y", "yotta", 24),
    prefix("Z", "zetta", 21),
    prefix("E", "exa", 18),
    prefix("P", "peta", 15),
    prefix("T", "tera", 12),
    prefix("G", "giga", 9),
    prefix("M", "mega", 6),
    prefix("k", "kilo", 3),
    prefix("h", "hecto", 2),
    prefix("d", "deci", -1),
    prefix("c", "centi", -2),
    prefix("m", "milli", -3),
    prefix("u", "micro", -6),
    prefix("µ", "micro", -6),
    prefix("μ", "micro", -6),
    prefix("n", "nano", -9),
    prefix("p", "pico", -12),
    prefix("f", "femto", -15),
    prefix("a", "atto", -18),
];

/// A single unit token resolved against the table, possibly prefixed.
struct Resolved {
    unit: &'static UnitDef,
    prefix: Option<&'static Prefix>,
}

impl Resolved {
    fn scale(&self) -> Scale {
        match self.prefix {
            Some(prefix) => self.unit.scale.times(Scale::new(1.0, prefix.exp10)),
            None => self.unit.scale,
        }
    }

    fn symbol(&self) -> String {
        match self.prefix {
            Some(prefix) => format!("{}{}", prefix.symbol, self.unit.symbol),
            None => self.unit.symbol.to_string(),
        }
    }

    fn full_names(&self) -> Vec<String> {
        let prefix = self.prefix.map(|prefix| prefix.name).unwrap_or("");
        self.unit
            .names
            .iter()
            .map(|name| format!("{prefix}{name}"))
            .collect()
    }
}

fn resolve_token(token: &str) -> Option<Resolved> {
    let lower = token.to_lowercase();
    let exact = UNITS.iter().find(|unit| {
        unit.symbol == token
            || unit.aliases.contains(&token)
            || unit.names.iter().any(|name| *name == lower)
    });
    if let Some(unit) = exact {
        return Some(Resolved { unit, prefix: None });
    }

    for prefix in PREFIXES {
        if let Some(rest) = token.strip_prefix(prefix.symbol) {
            if let Some(unit) = UNITS
                .iter()
                .find(|unit| unit.prefixable && unit.symbol == rest)
            {
                return Some(Resolved {
                    unit,
                    prefix: Some(prefix),
                });
            }
        }
        if let Some(rest) = lower.strip_prefix(prefix.name) {
            if let Some(unit) = UNITS
                .iter()
                .find(|unit| unit.prefixable && unit.names.contains(&rest))
            {
                return Some(Resolved {
                    unit,
                    prefix: Some(prefix),
                });
            }
        }
    }

    // plural full names: "meters", "kilograms"
    if let Some(singular) = token.strip_suffix('s') {
        if singular.chars().count() > 2 {
            return resolve_token(singular).filter(|resolved| {
                resolved.unit.names.iter().any(|name| {
                    singular.to_lowercase().ends_with(name)
                })
            });
        }
    }
    None
}

/// A parsed unit expression such as `mm`, `keV` or `(kg m^2) / s^2`.
struct UnitExpr {
    dims: Dims,
    scale: Scale,
    offset: f64,
    single: Option<Resolved>,
}

fn parse_unit(input: &str) -> Result<UnitExpr, BridgeError> {
    let unknown = || BridgeError::UnknownUnit(input.to_string());
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(unknown());
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|ch| *ch != '(' && *ch != ')')
        .map(|ch| if ch == '*' || ch == '·' { ' ' } else { ch })
        .collect();
    let mut sides = cleaned.splitn(3, '/');
    let numerator = sides.next().unwrap_or_default();
    let denominator = sides.next();
    if sides.next().is_some() {
        return Err(unknown());
    }

    let mut dims: Dims = [0; 7];
    let mut scale = Scale::ONE;
    let mut terms = Vec::new();
    for (side, sign) in [(Some(numerator), 1i32), (denominator, -1i32)] {
        let Some(side) = side else { continue };
        for token in side.split_whitespace() {
            if token == "1" {
                continue;
            }
            let (name, power) = match token.split_once('^') {
                Some((name, power)) => (name, power.parse::<i32>().map_err(|_| unknown())?),
                None => (token, 1),
            };
            let resolved = resolve_token(name).ok_or_else(unknown)?;
            let power = power * sign;
            for (dim, unit_dim) in dims.iter_mut().zip(resolved.unit.dims.iter()) {
                *dim += unit_dim * power as i8;
            }
            scale = scale.times(resolved.scale().powi(power));
            terms.push((resolved, power));
        }
    }

    if terms.is_empty() {
        return Err(unknown());
    }
    let single = if terms.len() == 1 && terms[0].1 == 1 {
        terms.pop().map(|(resolved, _)| resolved)
    } else {
        if terms.iter().any(|(resolved, _)| resolved.unit.offset != 0.0) {
            return Err(unknown());
        }
        None
    };
    let offset = single
        .as_ref()
        .map(|resolved| resolved.unit.offset)
        .unwrap_or(0.0);

    Ok(UnitExpr {
        dims,
        scale,
        offset,
        single,
    })
}

fn format_dims(dims: &Dims) -> String {
    let term = |symbol: &str, power: i8| {
        if power == 1 {
            symbol.to_string()
        } else {
            format!("{symbol}^{power}")
        }
    };
    let numerator: Vec<String> = BASE_SYMBOLS
        .iter()
        .zip(dims.iter())
        .filter(|(_, power)| **power > 0)
        .map(|(symbol, power)| term(symbol, *power))
        .collect();
    let denominator: Vec<String> = BASE_SYMBOLS
        .iter()
        .zip(dims.iter())
        .filter(|(_, power)| **power < 0)
        .map(|(symbol, power)| term(symbol, -*power))
        .collect();

    let group = |terms: &[String]| {
        if terms.len() > 1 {
            format!("({})", terms.join(" "))
        } else {
            terms.join(" ")
        }
    };
    match (numerator.is_empty(), denominator.is_empty()) {
        (true, true) => String::new(),
        (false, true) => numerator.join(" "),
        (true, false) => BASE_SYMBOLS
            .iter()
            .zip(dims.iter())
            .filter(|(_, power)| **power < 0)
            .map(|(symbol, power)| term(symbol, *power))
            .collect::<Vec<_>>()
            .join(" "),
        (false, false) => format!("{} / {}", group(&numerator), group(&denominator)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

/// Converts `value unit` to SI base units. The returned unit is the SI
/// expression, e.g. `m`, `K` or `(kg m^2) / s^2`.
pub fn to_si(value: f64, unit: &str) -> Result<Quantity, BridgeError> {
    let expr = parse_unit(unit)?;
    Ok(Quantity {
        value: expr.scale.apply(value + expr.offset),
        unit: format_dims(&expr.dims),
    })
}

/// Converts `value from` into the target unit, keeping `to` as given.
pub fn convert(value: f64, from: &str, to: &str) -> Result<Quantity, BridgeError> {
    let source = parse_unit(from)?;
    let target = parse_unit(to)?;
    if source.dims != target.dims {
        return Err(BridgeError::IncompatibleUnits {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let si = source.scale.apply(value + source.offset);
    Ok(Quantity {
        value: target.scale.unapply(si) - target.offset,
        unit: to.to_string(),
    })
}

pub fn si_unit(unit: &str) -> Result<String, BridgeError> {
    parse_unit(unit).map(|expr| format_dims(&expr.dims))
}

/// Spellings a stored unit may use for the same unit: the string as given,
/// its symbol and its full names.
pub fn unit_variants(unit: &str) -> Vec<String> {
    let mut variants = vec![unit.to_string()];
    if let Ok(UnitExpr {
        single: Some(resolved),
        ..
    }) = parse_unit(unit)
    {
        let mut push = |candidate: String| {
            if !variants.contains(&candidate) {
                variants.push(candidate);
            }
        };
        push(resolved.symbol());
        for name in resolved.full_names() {
            push(name);
        }
    }
    variants
}

/// Canonical full name (`millimeter`, `kelvin`) of a single-token unit.
pub fn full_name(unit: &str) -> Option<String> {
    let expr = parse_unit(unit).ok()?;
    expr.single
        .and_then(|resolved| resolved.full_names().into_iter().next())
}

/// JSON number for a converted value, integral values become integers.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
