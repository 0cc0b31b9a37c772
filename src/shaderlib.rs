//! Built-in GLSL function library.
//!
//! Generated shaders never inline these bodies; the emitter plants
//! `#pragma include "<name>"` lines and the post-processor splices the
//! sources in (each at most once per program). Signatures here must line up
//! with the calls `codegen` emits.

/// Shared small helpers, pulled in by the normal-handling nodes.
pub const FUNCTIONS: &str = r#"
float sRGBToLinear( const in float c ) {
    return c < 0.04045 ? c * ( 1.0 / 12.92 ) : pow( ( c + 0.055 ) * ( 1.0 / 1.055 ), 2.4 );
}

vec3 sRGBToLinear( const in vec3 c ) {
    return vec3( sRGBToLinear( c.r ), sRGBToLinear( c.g ), sRGBToLinear( c.b ) );
}

float linearTosRGB( const in float c ) {
    return c < 0.0031308 ? c * 12.92 : 1.055 * pow( c, 1.0 / 2.4 ) - 0.055;
}

vec3 linearTosRGB( const in vec3 c ) {
    return vec3( linearTosRGB( c.r ), linearTosRGB( c.g ), linearTosRGB( c.b ) );
}
"#;

/// The four per-kind shading functions. The trailing `out` parameters feed
/// the per-light intermediates the shadow stage reads back.
pub const LIGHTS: &str = r#"
float specularCoeff( const in vec3 normal, const in vec3 eyeVector, const in vec3 lightDir, const in float shininess ) {
    vec3 halfVector = normalize( eyeVector + lightDir );
    float NDH = dot( normal, halfVector );
    if ( NDH <= 0.0 ) return 0.0;
    return pow( NDH, shininess );
}

vec4 computeSunLightShading(
    const in vec3 normal,
    const in vec3 eyeVector,
    const in vec3 materialAmbient,
    const in vec3 materialDiffuse,
    const in vec3 materialSpecular,
    const in float materialShininess,
    const in vec3 lightAmbient,
    const in vec3 lightDiffuse,
    const in vec3 lightSpecular,
    const in vec4 lightPosition,
    const in mat4 lightMatrix,
    out vec3 eyeLightDir,
    out float NDL,
    out bool lighted ) {

    eyeLightDir = normalize( vec3( lightMatrix * lightPosition ) );
    NDL = dot( normal, eyeLightDir );
    lighted = NDL > 0.0;
    vec3 ambient = lightAmbient * materialAmbient;
    if ( !lighted ) return vec4( ambient, 1.0 );
    vec3 diffuse = lightDiffuse * materialDiffuse * NDL;
    vec3 specular = lightSpecular * materialSpecular * specularCoeff( normal, eyeVector, eyeLightDir, materialShininess );
    return vec4( ambient + diffuse + specular, 1.0 );
}

vec4 computeSpotLightShading(
    const in vec3 normal,
    const in vec3 eyeVector,
    const in vec3 materialAmbient,
    const in vec3 materialDiffuse,
    const in vec3 materialSpecular,
    const in float materialShininess,
    const in vec3 lightAmbient,
    const in vec3 lightDiffuse,
    const in vec3 lightSpecular,
    const in vec3 lightDirection,
    const in vec4 lightAttenuation,
    const in vec4 lightPosition,
    const in float lightSpotCutOff,
    const in float lightSpotBlend,
    const in mat4 lightMatrix,
    const in mat4 lightInvMatrix,
    out vec3 eyeLightPos,
    out vec3 eyeLightDir,
    out float NDL,
    out bool lighted ) {

    eyeLightPos = vec3( lightMatrix * lightPosition );
    eyeLightDir = normalize( eyeLightPos );
    vec3 spotDirection = normalize( mat3( lightInvMatrix ) * lightDirection );
    float cosCurAngle = dot( -eyeLightDir, spotDirection );
    NDL = dot( normal, eyeLightDir );
    lighted = NDL > 0.0 && cosCurAngle > lightSpotCutOff;
    vec3 ambient = lightAmbient * materialAmbient;
    if ( !lighted ) return vec4( ambient, 1.0 );

    float dist = length( eyeLightPos );
    float attenuation = 1.0 / ( lightAttenuation.x + lightAttenuation.y * dist + lightAttenuation.z * dist * dist );
    float spot = lightSpotBlend > 0.0
        ? clamp( ( cosCurAngle - lightSpotCutOff ) / lightSpotBlend, 0.0, 1.0 )
        : 1.0;
    vec3 diffuse = lightDiffuse * materialDiffuse * NDL;
    vec3 specular = lightSpecular * materialSpecular * specularCoeff( normal, eyeVector, eyeLightDir, materialShininess );
    return vec4( ambient + spot * attenuation * ( diffuse + specular ), 1.0 );
}

vec4 computePointLightShading(
    const in vec3 normal,
    const in vec3 eyeVector,
    const in vec3 materialAmbient,
    const in vec3 materialDiffuse,
    const in vec3 materialSpecular,
    const in float materialShininess,
    const in vec3 lightAmbient,
    const in vec3 lightDiffuse,
    const in vec3 lightSpecular,
    const in vec4 lightPosition,
    const in vec4 lightAttenuation,
    const in mat4 lightMatrix,
    out vec3 eyeLightPos,
    out vec3 eyeLightDir,
    out float NDL,
    out bool lighted ) {

    eyeLightPos = vec3( lightMatrix * lightPosition );
    float dist = length( eyeLightPos );
    eyeLightDir = dist > 0.0 ? eyeLightPos / dist : vec3( 0.0, 0.0, 1.0 );
    NDL = dot( normal, eyeLightDir );
    lighted = NDL > 0.0;
    vec3 ambient = lightAmbient * materialAmbient;
    if ( !lighted ) return vec4( ambient, 1.0 );

    float attenuation = 1.0 / ( lightAttenuation.x + lightAttenuation.y * dist + lightAttenuation.z * dist * dist );
    vec3 diffuse = lightDiffuse * materialDiffuse * NDL;
    vec3 specular = lightSpecular * materialSpecular * specularCoeff( normal, eyeVector, eyeLightDir, materialShininess );
    return vec4( ambient + attenuation * ( diffuse + specular ), 1.0 );
}

vec4 computeHemiLightShading(
    const in vec3 normal,
    const in vec3 eyeVector,
    const in vec3 materialDiffuse,
    const in vec3 materialSpecular,
    const in float materialShininess,
    const in vec3 lightDiffuse,
    const in vec3 lightGround,
    const in vec4 lightPosition,
    const in mat4 lightMatrix,
    out vec3 eyeLightDir,
    out float NDL,
    out bool lighted ) {

    lighted = true;
    eyeLightDir = normalize( vec3( lightMatrix * lightPosition ) );
    NDL = dot( normal, eyeLightDir );
    float weight = 0.5 * NDL + 0.5;
    vec3 diffuse = materialDiffuse * mix( lightGround, lightDiffuse, weight );
    vec3 specular = materialSpecular * specularCoeff( normal, eyeVector, eyeLightDir, materialShininess ) * weight;
    return vec4( diffuse + specular, 1.0 );
}
"#;

pub const TEXTURES: &str = r#"
vec4 textureRGBA( const in sampler2D tex, const in vec2 uv ) {
    return texture2D( tex, uv.xy ).rgba;
}

vec4 textureCubeRGBA( const in samplerCube tex, const in vec3 dir ) {
    return textureCube( tex, dir ).rgba;
}
"#;

/// Shadow-map receive. One algorithm is compiled per program, selected by
/// the `_PCF` / `_ESM` / `_VSM` / `_EVSM` define the receiver forwards.
pub const SHADOWS_RECEIVE: &str = r#"
float decodeDepth( const in vec4 rgba ) {
    return dot( rgba, vec4( 1.0, 1.0 / 255.0, 1.0 / 65025.0, 1.0 / 16581375.0 ) );
}

bool shadowCoords( const in mat4 shadowProjection, const in mat4 shadowView, const in vec4 depthRange,
                   const in vec3 vertexWorld, out vec2 uv, out float fragDepth ) {
    vec4 shadowVertex = shadowProjection * shadowView * vec4( vertexWorld, 1.0 );
    vec3 ndc = shadowVertex.xyz / shadowVertex.w;
    uv = ndc.xy * 0.5 + 0.5;
    fragDepth = clamp( ( -shadowVertex.z * shadowVertex.w - depthRange.x ) / depthRange.w, 0.0, 1.0 );
    return all( bvec4( uv.x >= 0.0, uv.x <= 1.0, uv.y >= 0.0, uv.y <= 1.0 ) );
}

#ifdef _PCF
float computeShadow( const in bool lighted, const in sampler2D shadowTexture, const in vec4 shadowMapSize,
                     const in mat4 shadowProjection, const in mat4 shadowView, const in vec4 shadowDepthRange,
                     const in float NDL, const in vec3 vertexWorld, const in float bias ) {
    if ( !lighted || NDL <= 0.0 ) return 1.0;
    vec2 uv; float fragDepth;
    if ( !shadowCoords( shadowProjection, shadowView, shadowDepthRange, vertexWorld, uv, fragDepth ) ) return 1.0;
    vec2 texel = 1.0 / shadowMapSize.xy;
    float lit = 0.0;
    for ( int x = -1; x <= 1; x++ ) {
        for ( int y = -1; y <= 1; y++ ) {
            float depth = decodeDepth( texture2D( shadowTexture, uv + vec2( float( x ), float( y ) ) * texel ) );
            lit += fragDepth - bias <= depth ? 1.0 : 0.0;
        }
    }
    return lit / 9.0;
}
#endif

#ifdef _ESM
float computeShadow( const in bool lighted, const in sampler2D shadowTexture, const in vec4 shadowMapSize,
                     const in mat4 shadowProjection, const in mat4 shadowView, const in vec4 shadowDepthRange,
                     const in float NDL, const in vec3 vertexWorld, const in float bias,
                     const in float exponent0, const in float exponent1 ) {
    if ( !lighted || NDL <= 0.0 ) return 1.0;
    vec2 uv; float fragDepth;
    if ( !shadowCoords( shadowProjection, shadowView, shadowDepthRange, vertexWorld, uv, fragDepth ) ) return 1.0;
    float occluder = decodeDepth( texture2D( shadowTexture, uv ) );
    float receiver = exponent0 * ( fragDepth - bias );
    return clamp( exp( occluder * exponent1 - receiver ), 0.0, 1.0 );
}
#endif

#ifdef _VSM
float chebyshevUpperBound( const in vec2 moments, const in float depth, const in float epsilon ) {
    if ( depth <= moments.x ) return 1.0;
    float variance = max( moments.y - moments.x * moments.x, epsilon );
    float d = depth - moments.x;
    return variance / ( variance + d * d );
}

float computeShadow( const in bool lighted, const in sampler2D shadowTexture, const in vec4 shadowMapSize,
                     const in mat4 shadowProjection, const in mat4 shadowView, const in vec4 shadowDepthRange,
                     const in float NDL, const in vec3 vertexWorld, const in float bias,
                     const in float epsilonVSM ) {
    if ( !lighted || NDL <= 0.0 ) return 1.0;
    vec2 uv; float fragDepth;
    if ( !shadowCoords( shadowProjection, shadowView, shadowDepthRange, vertexWorld, uv, fragDepth ) ) return 1.0;
    vec2 moments = texture2D( shadowTexture, uv ).rg;
    return chebyshevUpperBound( moments, fragDepth - bias, epsilonVSM );
}
#endif

#ifdef _EVSM
float chebyshevUpperBound( const in vec2 moments, const in float depth, const in float epsilon ) {
    if ( depth <= moments.x ) return 1.0;
    float variance = max( moments.y - moments.x * moments.x, epsilon );
    float d = depth - moments.x;
    return variance / ( variance + d * d );
}

float computeShadow( const in bool lighted, const in sampler2D shadowTexture, const in vec4 shadowMapSize,
                     const in mat4 shadowProjection, const in mat4 shadowView, const in vec4 shadowDepthRange,
                     const in float NDL, const in vec3 vertexWorld, const in float bias,
                     const in float epsilonVSM, const in float exponent0, const in float exponent1 ) {
    if ( !lighted || NDL <= 0.0 ) return 1.0;
    vec2 uv; float fragDepth;
    if ( !shadowCoords( shadowProjection, shadowView, shadowDepthRange, vertexWorld, uv, fragDepth ) ) return 1.0;
    vec4 moments = texture2D( shadowTexture, uv );
    float warpedDepth = exp( exponent0 * ( fragDepth - bias ) );
    float posContrib = chebyshevUpperBound( moments.xy, warpedDepth, epsilonVSM );
    float warpedNeg = -exp( -exponent1 * ( fragDepth - bias ) );
    float negContrib = chebyshevUpperBound( moments.zw, warpedNeg, epsilonVSM );
    return min( posContrib, negContrib );
}
#endif
"#;

/// `skeletalTransform` reads the bone palette `uBones` directly; the caller
/// only passes weights and indices. The palette declaration is emitted by the
/// compiler because the palette uniform is wired as a node input.
pub const SKINNING: &str = r#"
mat4 getMat4FromVec4( const in int index ) {
    vec4 l1 = uBones[ index ];
    vec4 l2 = uBones[ index + 1 ];
    vec4 l3 = uBones[ index + 2 ];
    return mat4( l1.x, l2.x, l3.x, 0.0,
                 l1.y, l2.y, l3.y, 0.0,
                 l1.z, l2.z, l3.z, 0.0,
                 l1.w, l2.w, l3.w, 1.0 );
}

mat4 skeletalTransform( const in vec4 weights, const in vec4 bonesIndex ) {
    ivec4 idx = 3 * ivec4( bonesIndex );
    mat4 outMat = weights.x * getMat4FromVec4( idx.x );
    outMat += weights.y * getMat4FromVec4( idx.y );
    outMat += weights.z * getMat4FromVec4( idx.z );
    outMat += weights.w * getMat4FromVec4( idx.w );
    return outMat;
}
"#;

/// Screen-aligned billboarding: the vertex offsets the object origin in eye
/// space, so the geometry always faces the camera.
pub const BILLBOARD: &str = r#"
vec4 billboard( const in vec3 vertex, const in mat4 modelViewMatrix, const in mat4 projectionMatrix ) {
    vec4 center = modelViewMatrix * vec4( 0.0, 0.0, 0.0, 1.0 );
    return projectionMatrix * ( center + vec4( vertex, 0.0 ) );
}
"#;

/// The includes registered on a fresh [`TextProcessor`](crate::processor::TextProcessor).
pub fn builtins() -> impl Iterator<Item = (&'static str, &'static str)> {
    [
        ("functions.glsl", FUNCTIONS),
        ("lights.glsl", LIGHTS),
        ("textures.glsl", TEXTURES),
        ("shadows_receive.glsl", SHADOWS_RECEIVE),
        ("skinning.glsl", SKINNING),
        ("billboard.glsl", BILLBOARD),
    ]
    .into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_registered_once() {
        let names: Vec<_> = builtins().map(|(name, _)| name).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn shadow_library_guards_every_algorithm() {
        for tag in ["_PCF", "_ESM", "_VSM", "_EVSM"] {
            assert!(
                SHADOWS_RECEIVE.contains(&format!("#ifdef {tag}")),
                "missing guard for {tag}"
            );
        }
    }
}
